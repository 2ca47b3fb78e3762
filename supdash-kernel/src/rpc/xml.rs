/**
 * CODEC XML-RPC - Encodage des appels et décodage des réponses supervisord
 *
 * RÔLE :
 * Traduit un appel (méthode + paramètres) en document `methodCall` et une réponse
 * `methodResponse` en `Value`, en distinguant les faults protocolaires.
 *
 * FONCTIONNEMENT :
 * - Encodage : simple écriture de chaînes, textes échappés par quick-xml
 * - Décodage : lecture événementielle quick-xml → petit arbre d'éléments → Value
 * - Types supportés : int/i4/i8, boolean, double, string, dateTime.iso8601,
 *   base64, nil, array, struct
 */

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum XmlRpcError {
    #[error("malformed xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("fault {code}: {message}")]
    Fault { code: i64, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Double(f64),
    Str(String),
    DateTime(String),
    Base64(String),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    Nil,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Membre d'un struct
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Struct(members) => members.get(key),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        write_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

fn write_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(i) => out.push_str(&format!("<int>{i}</int>")),
        Value::Bool(b) => out.push_str(if *b { "<boolean>1</boolean>" } else { "<boolean>0</boolean>" }),
        Value::Double(d) => out.push_str(&format!("<double>{d}</double>")),
        Value::Str(s) => {
            out.push_str("<string>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</string>");
        }
        Value::DateTime(s) => {
            out.push_str("<dateTime.iso8601>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</dateTime.iso8601>");
        }
        Value::Base64(s) => {
            out.push_str("<base64>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</base64>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name.as_str()));
                out.push_str("</name>");
                write_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

/// Décode un `methodResponse` ; un `<fault>` devient `XmlRpcError::Fault`
pub fn decode_response(body: &str) -> Result<Value, XmlRpcError> {
    let root = parse_tree(body)?;
    if root.name != "methodResponse" {
        return Err(malformed(format!("unexpected root <{}>", root.name)));
    }

    if let Some(fault) = root.child("fault") {
        let value = parse_value(fault.child("value").ok_or_else(|| malformed("fault without value"))?)?;
        let code = value.get("faultCode").and_then(Value::as_i64).unwrap_or_default();
        let message = value
            .get("faultString")
            .and_then(Value::as_str)
            .unwrap_or("unknown fault")
            .to_string();
        return Err(XmlRpcError::Fault { code, message });
    }

    let value = root
        .child("params")
        .and_then(|p| p.child("param"))
        .and_then(|p| p.child("value"))
        .ok_or_else(|| malformed("response without params"))?;
    parse_value(value)
}

fn malformed<S: Into<String>>(msg: S) -> XmlRpcError {
    XmlRpcError::Malformed(msg.into())
}

#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn new(name: &[u8]) -> Self {
        Self { name: String::from_utf8_lossy(name).into_owned(), ..Default::default() }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn parse_tree(xml: &str) -> Result<Element, XmlRpcError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(Element::new(e.name().as_ref())),
            Event::Empty(e) => {
                let element = Element::new(e.name().as_ref());
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| malformed("unbalanced closing tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Text(t) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed("unexpected end of document"));
    }
    root.ok_or_else(|| malformed("empty document"))
}

fn parse_value(element: &Element) -> Result<Value, XmlRpcError> {
    // <value>texte</value> sans type = string
    let Some(typed) = element.children.first() else {
        return Ok(Value::Str(element.text.clone()));
    };

    let text = typed.text.as_str();
    match typed.name.as_str() {
        "string" => Ok(Value::Str(text.to_string())),
        "int" | "i4" | "i8" => text
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| malformed(format!("bad int {text:?}"))),
        "boolean" => match text.trim() {
            "1" => Ok(Value::Bool(true)),
            "0" => Ok(Value::Bool(false)),
            other => Err(malformed(format!("bad boolean {other:?}"))),
        },
        "double" => text
            .trim()
            .parse()
            .map(Value::Double)
            .map_err(|_| malformed(format!("bad double {text:?}"))),
        "dateTime.iso8601" => Ok(Value::DateTime(text.trim().to_string())),
        "base64" => Ok(Value::Base64(text.trim().to_string())),
        "nil" => Ok(Value::Nil),
        "array" => {
            let data = typed.child("data").ok_or_else(|| malformed("array without data"))?;
            data.children
                .iter()
                .filter(|c| c.name == "value")
                .map(parse_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        "struct" => {
            let mut members = BTreeMap::new();
            for member in typed.children.iter().filter(|c| c.name == "member") {
                let name = member.child("name").ok_or_else(|| malformed("member without name"))?;
                let value = member.child("value").ok_or_else(|| malformed("member without value"))?;
                members.insert(name.text.clone(), parse_value(value)?);
            }
            Ok(Value::Struct(members))
        }
        other => Err(malformed(format!("unsupported type <{other}>"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROCESS_INFO: &str = r#"<?xml version='1.0'?>
<methodResponse>
<params>
<param>
<value><struct>
<member><name>name</name><value><string>web</string></value></member>
<member><name>group</name><value><string>web</string></value></member>
<member><name>start</name><value><int>1700000000</int></value></member>
<member><name>stop</name><value><int>0</int></value></member>
<member><name>now</name><value><int>1700000100</int></value></member>
<member><name>state</name><value><int>20</int></value></member>
<member><name>statename</name><value><string>RUNNING</string></value></member>
<member><name>description</name><value><string>pid 42, uptime 0:01:40</string></value></member>
<member><name>pid</name><value><int>42</int></value></member>
<member><name>logfile</name><value>/var/log/web.log</value></member>
</struct></value>
</param>
</params>
</methodResponse>"#;

    #[test]
    fn test_encode_call_escapes_params() {
        let xml = encode_call("supervisor.startProcess", &[Value::from("a<b&c"), Value::from(true)]);
        assert!(xml.contains("<methodName>supervisor.startProcess</methodName>"));
        assert!(xml.contains("<string>a&lt;b&amp;c</string>"));
        assert!(xml.contains("<boolean>1</boolean>"));
    }

    #[test]
    fn test_decode_struct_response() {
        let value = decode_response(PROCESS_INFO).unwrap();
        assert_eq!(value.get("name").and_then(Value::as_str), Some("web"));
        assert_eq!(value.get("start").and_then(Value::as_i64), Some(1_700_000_000));
        assert_eq!(value.get("statename").and_then(Value::as_str), Some("RUNNING"));
        // valeur sans type explicite = string
        assert_eq!(value.get("logfile").and_then(Value::as_str), Some("/var/log/web.log"));
    }

    #[test]
    fn test_decode_fault() {
        let body = r#"<?xml version='1.0'?>
<methodResponse><fault><value><struct>
<member><name>faultCode</name><value><int>10</int></value></member>
<member><name>faultString</name><value><string>BAD_NAME: nope</string></value></member>
</struct></value></fault></methodResponse>"#;
        match decode_response(body) {
            Err(XmlRpcError::Fault { code, message }) => {
                assert_eq!(code, 10);
                assert_eq!(message, "BAD_NAME: nope");
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_boolean_and_array() {
        let body = "<methodResponse><params><param><value><boolean>1</boolean></value></param></params></methodResponse>";
        assert_eq!(decode_response(body).unwrap(), Value::Bool(true));

        let body = "<methodResponse><params><param><value><array><data>\
                    <value><i4>1</i4></value><value><string>x</string></value><value><nil/></value>\
                    </data></array></value></param></params></methodResponse>";
        assert_eq!(
            decode_response(body).unwrap(),
            Value::Array(vec![Value::Int(1), Value::from("x"), Value::Nil])
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_response("<html><body>502 Bad Gateway</body></html>").is_err());
        assert!(decode_response("<methodResponse><params>").is_err());
        assert!(decode_response("").is_err());
    }
}
