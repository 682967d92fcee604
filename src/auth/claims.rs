use serde::{Deserialize, Serialize};

/// Token class. Each class is signed with its own secret and the verifier
/// also checks this claim.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Reset,
}

/// JWT payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,     // user id, or email for reset tokens
    pub exp: i64,        // expires at (unix timestamp)
    pub iat: i64,        // issued at (unix timestamp)
    pub iss: String,     // issuer
    pub kind: TokenKind, // token class
}
