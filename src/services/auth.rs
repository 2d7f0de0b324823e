use std::sync::Arc;

use garde::Validate;
use tracing::{info, warn};

use crate::error::ClientError;
use crate::models::session::{LoginRequest, LoginResponse, Session, SessionEvent, UserProfile};
use crate::services::api::{ApiClient, ApiRequest};

/// Creates and ends sessions against the backend's `/auth` endpoints.
pub struct AuthService {
    api: Arc<ApiClient>,
}

impl AuthService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    /// Exchange credentials for a token and store the resulting session.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, ClientError> {
        let request = LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        request.validate()?;

        let response: LoginResponse = self.api.post_json("/auth/login", &request).await?;
        let session = Session {
            token: response.access_token,
            user: response.user,
        };
        self.api.session().save(&session)?;
        self.api.events().emit(SessionEvent::LoggedIn);

        info!(user = %session.user.email, "Logged in");
        Ok(session.user)
    }

    /// End the session. The remote call is best effort: local session data
    /// is cleared whether or not the backend could be reached.
    pub async fn logout(&self) -> Result<(), ClientError> {
        if self.api.session().load().is_some() {
            match self.api.send(ApiRequest::post("/auth/logout")).await {
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Remote logout failed, clearing local session anyway"),
            }
        }

        self.api.session().clear()?;
        self.api.events().emit(SessionEvent::LoggedOut);
        info!("Logged out");
        Ok(())
    }

    /// `GET /auth/me`.
    pub async fn current_user(&self) -> Result<UserProfile, ClientError> {
        self.api.get_json("/auth/me").await
    }

    /// The user stored locally, without asking the backend.
    pub fn stored_user(&self) -> Option<UserProfile> {
        self.api.session().load().map(|session| session.user)
    }
}
