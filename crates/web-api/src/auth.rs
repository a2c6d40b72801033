//! JWT 认证模块
//!
//! 提供 JWT token 验证，以及供外部登录服务和测试使用的 token 生成

use application::{ApplicationError, Authenticator, Identity};
use axum::http::HeaderMap;
use config::JwtConfig;
use domain::Username;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub username: String,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 生成 JWT token
    pub fn generate_token(&self, user_id: Uuid, username: &Username) -> Result<String, ApiError> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            user_id,
            username: username.to_string(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("Token generation failed: {}", err)))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApplicationError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApplicationError::authentication(format!("Invalid token: {}", err)))
    }
}

impl Authenticator for JwtService {
    fn authenticate(&self, credential: &str) -> Result<Identity, ApplicationError> {
        let claims = self.verify_token(credential)?;
        let username = Username::parse(claims.username)
            .map_err(|_| ApplicationError::authentication("token carries no username"))?;

        Ok(Identity {
            user_id: claims.user_id,
            username,
        })
    }
}

/// 从 headers 中提取 Bearer token 并校验
pub fn authenticate_headers(
    authenticator: &dyn Authenticator,
    headers: &HeaderMap,
) -> Result<Identity, ApiError> {
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

    Ok(authenticator.authenticate(token)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::AUTHORIZATION, HeaderValue};

    fn service() -> JwtService {
        JwtService::new(JwtConfig {
            secret: "unit-test-secret-key-with-enough-length".to_string(),
            expiration_hours: 1,
        })
    }

    #[test]
    fn token_round_trip_yields_identity() {
        let jwt = service();
        let user_id = Uuid::new_v4();
        let token = jwt
            .generate_token(user_id, &Username::parse("alice").unwrap())
            .unwrap();

        let identity = jwt.authenticate(&token).unwrap();
        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.username.as_str(), "alice");
    }

    #[test]
    fn foreign_and_expired_tokens_are_rejected() {
        let jwt = service();
        let other = JwtService::new(JwtConfig {
            secret: "another-secret-key-with-enough-length!!".to_string(),
            expiration_hours: 1,
        });
        let token = other
            .generate_token(Uuid::new_v4(), &Username::parse("alice").unwrap())
            .unwrap();
        assert!(matches!(
            jwt.authenticate(&token),
            Err(ApplicationError::Authentication(_))
        ));

        let expired = encode(
            &Header::default(),
            &Claims {
                user_id: Uuid::new_v4(),
                username: "alice".into(),
                exp: chrono::Utc::now().timestamp() - 3600,
            },
            &EncodingKey::from_secret(b"unit-test-secret-key-with-enough-length"),
        )
        .unwrap();
        assert!(jwt.authenticate(&expired).is_err());
        assert!(jwt.authenticate("not.a.token").is_err());
    }

    #[test]
    fn blank_username_claim_is_rejected() {
        let token = encode(
            &Header::default(),
            &Claims {
                user_id: Uuid::new_v4(),
                username: "   ".into(),
                exp: chrono::Utc::now().timestamp() + 3600,
            },
            &EncodingKey::from_secret(b"unit-test-secret-key-with-enough-length"),
        )
        .unwrap();
        assert!(service().authenticate(&token).is_err());
    }

    #[test]
    fn headers_require_bearer_scheme() {
        let jwt = service();
        let mut headers = HeaderMap::new();
        assert!(authenticate_headers(&jwt, &headers).is_err());

        let token = jwt
            .generate_token(Uuid::new_v4(), &Username::parse("bob").unwrap())
            .unwrap();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&token).unwrap());
        assert!(authenticate_headers(&jwt, &headers).is_err());

        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        let identity = authenticate_headers(&jwt, &headers).unwrap();
        assert_eq!(identity.username.as_str(), "bob");
    }
}
