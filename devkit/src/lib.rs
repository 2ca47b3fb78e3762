/*!
# Supdash DevKit - Faux supervisord et utilitaires de test

Bibliothèque facilitant les tests du kernel sans démon réel :
- Faux serveur XML-RPC supervisord (processus, faults, latence, appels enregistrés)
- Codec XML-RPC minimal côté serveur
- Harness pour composer plusieurs démons et générer la config YAML
*/

pub mod fake_supervisor;
pub mod test_utils;
pub mod xmlrpc;

pub use fake_supervisor::{FakeSupervisor, RecordedCall};
pub use test_utils::TestHarness;
