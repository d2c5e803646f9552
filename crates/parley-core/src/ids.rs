use uuid::Uuid;

/// Generate a new random uid
pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a uid prefixed with a readable name, e.g. `(main)4f1c...`
pub fn new_readable_uid(name: &str) -> String {
    format!("({}){}", name, Uuid::new_v4())
}
