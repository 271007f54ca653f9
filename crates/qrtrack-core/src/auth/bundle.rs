use serde::{Deserialize, Serialize};

/// Credentials for one authenticated session.
///
/// Every field is optional because identity providers differ in what they
/// return. A bundle missing either `expires_in_seconds` or
/// `issued_at_epoch_millis` is always treated as expired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token as reported at issuance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<i64>,
    /// Wall-clock time the bundle was obtained or refreshed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at_epoch_millis: Option<i64>,
}

impl TokenBundle {
    /// Absolute expiry of the access token, if both timing fields are known.
    pub fn expiry_epoch_millis(&self) -> Option<i64> {
        let issued_at = self.issued_at_epoch_millis?;
        let expires_in = self.expires_in_seconds?;
        Some(issued_at.saturating_add(expires_in.saturating_mul(1000)))
    }

    /// The token to revoke on sign-out: the refresh token when present,
    /// since revoking it also ends the access token at most providers.
    pub fn revocable_token(&self) -> Option<&str> {
        self.refresh_token
            .as_deref()
            .or(self.access_token.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_camel_case_keys() {
        let bundle = TokenBundle {
            access_token: Some("a".to_string()),
            refresh_token: Some("r".to_string()),
            expires_in_seconds: Some(3600),
            issued_at_epoch_millis: Some(1_700_000_000_000),
            ..Default::default()
        };

        let json = serde_json::to_string(&bundle).expect("serialize bundle");
        assert!(json.contains("\"accessToken\":\"a\""));
        assert!(json.contains("\"refreshToken\":\"r\""));
        assert!(json.contains("\"expiresInSeconds\":3600"));
        assert!(json.contains("\"issuedAtEpochMillis\":1700000000000"));
        // Absent fields are omitted rather than written as null
        assert!(!json.contains("idToken"));
    }

    #[test]
    fn test_deserializes_partial_bundle() {
        let bundle: TokenBundle =
            serde_json::from_str(r#"{"accessToken":"a"}"#).expect("parse bundle");
        assert_eq!(bundle.access_token.as_deref(), Some("a"));
        assert!(bundle.expires_in_seconds.is_none());
        assert!(bundle.expiry_epoch_millis().is_none());
    }

    #[test]
    fn test_expiry_epoch_millis() {
        let bundle = TokenBundle {
            expires_in_seconds: Some(60),
            issued_at_epoch_millis: Some(1_000),
            ..Default::default()
        };
        assert_eq!(bundle.expiry_epoch_millis(), Some(61_000));
    }

    #[test]
    fn test_revocable_token_prefers_refresh_token() {
        let mut bundle = TokenBundle {
            access_token: Some("a".to_string()),
            refresh_token: Some("r".to_string()),
            ..Default::default()
        };
        assert_eq!(bundle.revocable_token(), Some("r"));

        bundle.refresh_token = None;
        assert_eq!(bundle.revocable_token(), Some("a"));
    }
}
