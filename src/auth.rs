use axum::http::{HeaderMap, header};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::{
    challenge::models::SessionOwner,
    error::{ApiError, ApiResult},
};

/// Claims minted by the platform's login and interview-link flows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interview_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_response_id: Option<i64>,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<i64>,
    pub exp: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Session(SessionOwner),
    Company(i64),
}

impl Claims {
    pub fn principal(&self) -> Option<Principal> {
        if let Some(id) = self.interview_id {
            Some(Principal::Session(SessionOwner::Interview(id)))
        } else if let Some(id) = self.test_response_id {
            Some(Principal::Session(SessionOwner::StaffTest(id)))
        } else {
            self.company_id.map(Principal::Company)
        }
    }
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> ApiResult<Claims>;
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> ApiResult<Claims> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| {
                tracing::debug!(error = %err, "rejected session token");
                ApiError::Unauthorized
            })
    }
}

pub fn bearer_token(headers: &HeaderMap) -> ApiResult<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::Unauthorized)
}

pub fn principal(verifier: &dyn TokenVerifier, headers: &HeaderMap) -> ApiResult<Principal> {
    verifier
        .verify(bearer_token(headers)?)?
        .principal()
        .ok_or(ApiError::Unauthorized)
}

pub fn session_owner(verifier: &dyn TokenVerifier, headers: &HeaderMap) -> ApiResult<SessionOwner> {
    match principal(verifier, headers)? {
        Principal::Session(owner) => Ok(owner),
        Principal::Company(_) => Err(ApiError::Unauthorized),
    }
}

pub fn company_id(verifier: &dyn TokenVerifier, headers: &HeaderMap) -> ApiResult<i64> {
    match principal(verifier, headers)? {
        Principal::Company(id) => Ok(id),
        Principal::Session(_) => Err(ApiError::Unauthorized),
    }
}

#[cfg(test)]
pub(crate) fn issue_token(secret: &str, claims: Claims) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let claims = Claims {
        exp: (chrono::Utc::now().timestamp() + 3_600) as usize,
        ..claims
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, header};

    use super::{
        Claims, JwtVerifier, Principal, TokenVerifier, company_id, issue_token, session_owner,
    };
    use crate::{challenge::models::SessionOwner, error::ApiError};

    const SECRET: &str = "test-secret";

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn candidate_token_yields_interview_owner() {
        let verifier = JwtVerifier::new(SECRET);
        let token = issue_token(
            SECRET,
            Claims {
                interview_id: Some(42),
                ..Claims::default()
            },
        );
        let owner = session_owner(&verifier, &bearer(&token)).unwrap();
        assert_eq!(owner, SessionOwner::Interview(42));
        assert!(matches!(
            company_id(&verifier, &bearer(&token)),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn staff_test_and_company_tokens_are_distinguished() {
        let staff = Claims {
            test_response_id: Some(8),
            ..Claims::default()
        };
        assert_eq!(
            staff.principal(),
            Some(Principal::Session(SessionOwner::StaffTest(8)))
        );

        let verifier = JwtVerifier::new(SECRET);
        let token = issue_token(
            SECRET,
            Claims {
                company_id: Some(3),
                ..Claims::default()
            },
        );
        assert_eq!(company_id(&verifier, &bearer(&token)).unwrap(), 3);
    }

    #[test]
    fn rejects_foreign_signature_and_missing_header() {
        let verifier = JwtVerifier::new(SECRET);
        let token = issue_token(
            "another-secret",
            Claims {
                interview_id: Some(1),
                ..Claims::default()
            },
        );
        assert!(verifier.verify(&token).is_err());
        assert!(matches!(
            session_owner(&verifier, &HeaderMap::new()),
            Err(ApiError::Unauthorized)
        ));
    }
}
