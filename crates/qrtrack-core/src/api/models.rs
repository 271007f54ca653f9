use serde::{Deserialize, Serialize};

/// Application-level user record, looked up by the email in the session's
/// token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
}

impl User {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(name), None) | (None, Some(name)) => name.clone(),
            (None, None) => self.email.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user() {
        let json = r#"{
            "id": "u-1",
            "email": "tech@example.com",
            "firstName": "Dana",
            "lastName": "Ruiz",
            "organizationId": "org-9",
            "role": "admin"
        }"#;
        let user: User = serde_json::from_str(json).expect("Failed to parse user test JSON");
        assert_eq!(user.id, "u-1");
        assert_eq!(user.organization_id.as_deref(), Some("org-9"));
        assert_eq!(user.display_name(), "Dana Ruiz");
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let user: User = serde_json::from_str(r#"{"id":"u-2","email":"x@example.com"}"#).unwrap();
        assert_eq!(user.display_name(), "x@example.com");
    }
}
