/*!
Codec XML-RPC côté serveur, juste assez pour imiter supervisord

Lecture d'un `methodCall` (nom + paramètres scalaires en texte) et écriture des
réponses : booléen, struct, fault.
*/

use anyhow::{bail, Result};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt::Write as _;

/// Membre d'une struct de réponse
#[derive(Debug, Clone)]
pub enum Member {
    Int(i64),
    Str(String),
}

/// Parse un `methodCall` : renvoie le nom de méthode et les paramètres scalaires
pub fn parse_call(body: &str) -> Result<(String, Vec<String>)> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut method = String::new();
    let mut params = Vec::new();
    let mut current: Vec<u8> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => current = e.name().as_ref().to_vec(),
            Event::Text(t) => {
                let text = t.unescape()?.into_owned();
                match current.as_slice() {
                    b"methodName" => method = text,
                    b"string" | b"value" | b"boolean" | b"int" | b"i4" => params.push(text),
                    _ => {}
                }
            }
            Event::End(_) => current.clear(),
            Event::Eof => break,
            _ => {}
        }
    }

    if method.is_empty() {
        bail!("methodName missing");
    }
    Ok((method, params))
}

fn wrap(value: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n<methodResponse><params><param><value>{value}</value></param></params></methodResponse>\n"
    )
}

pub fn bool_response(value: bool) -> String {
    wrap(&format!("<boolean>{}</boolean>", u8::from(value)))
}

pub fn struct_response(members: &[(&str, Member)]) -> String {
    let mut body = String::from("<struct>");
    for (name, member) in members {
        let value = match member {
            Member::Int(i) => format!("<int>{i}</int>"),
            Member::Str(s) => format!("<string>{}</string>", escape(s.as_str())),
        };
        let _ = write!(body, "<member><name>{}</name><value>{value}</value></member>", escape(*name));
    }
    body.push_str("</struct>");
    wrap(&body)
}

pub fn fault_response(code: i64, message: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n<methodResponse><fault><value><struct>\
         <member><name>faultCode</name><value><int>{code}</int></value></member>\
         <member><name>faultString</name><value><string>{}</string></value></member>\
         </struct></value></fault></methodResponse>\n",
        escape(message)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_supervisor_call() {
        let body = r#"<?xml version="1.0"?>
<methodCall>
  <methodName>supervisor.startProcess</methodName>
  <params>
    <param><value><string>web&amp;co</string></value></param>
    <param><value><boolean>1</boolean></value></param>
  </params>
</methodCall>"#;
        let (method, params) = parse_call(body).unwrap();
        assert_eq!(method, "supervisor.startProcess");
        assert_eq!(params, vec!["web&co", "1"]);
    }

    #[test]
    fn test_untyped_value_is_a_param() {
        let (_, params) =
            parse_call("<methodCall><methodName>m</methodName><params><param><value>x</value></param></params></methodCall>")
                .unwrap();
        assert_eq!(params, vec!["x"]);
    }

    #[test]
    fn test_missing_method_name() {
        assert!(parse_call("<methodCall><params/></methodCall>").is_err());
    }

    #[test]
    fn test_fault_escapes_message() {
        let xml = fault_response(10, "BAD_NAME: <x>");
        assert!(xml.contains("<int>10</int>"));
        assert!(xml.contains("BAD_NAME: &lt;x&gt;"));
    }
}
