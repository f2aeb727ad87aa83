// Registration, login and auth state
//
// Registration checks the form, refuses phone numbers that are already
// registered, creates the identity-provider account and then writes the
// profile and phone-number documents. Passwords go to the identity provider
// only; the profile never carries one.

use chrono::Utc;
use log::{error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::fields;
use crate::backend::{DocumentFeed, IdentityProvider, Query};
use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::models::{AuthState, Participant, UserProfile};

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s.]+(\.[^@\s.]+)+$").expect("email pattern is valid")
});

const MISSING_FIELDS: &str = "Please fill in all fields.";

#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    pub email: String,
    pub username: String,
    pub phone: String,
    pub password: String,
}

impl RegistrationForm {
    pub fn validate(&self, min_password_length: usize) -> Result<(), ChatError> {
        let required = [&self.email, &self.username, &self.phone, &self.password];
        if required.iter().any(|field| field.trim().is_empty()) {
            return Err(ChatError::Validation(MISSING_FIELDS.to_string()));
        }
        if self.password.chars().count() < min_password_length {
            return Err(ChatError::WeakPassword(min_password_length));
        }
        if !EMAIL_REGEX.is_match(self.email.trim()) {
            return Err(ChatError::InvalidEmail);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.email.trim().is_empty() || self.password.is_empty() {
            return Err(ChatError::Validation(MISSING_FIELDS.to_string()));
        }
        Ok(())
    }
}

pub struct Account {
    identity: Arc<dyn IdentityProvider>,
    feed: Arc<dyn DocumentFeed>,
    config: ClientConfig,
}

impl Account {
    pub fn new(identity: Arc<dyn IdentityProvider>, feed: Arc<dyn DocumentFeed>, config: &ClientConfig) -> Self {
        Self {
            identity,
            feed,
            config: config.clone(),
        }
    }

    pub fn current_user(&self) -> Option<Participant> {
        self.identity.current_user()
    }

    /// Signed-in / signed-out transitions, starting with the current state
    pub fn auth_changes(&self) -> mpsc::Receiver<AuthState> {
        self.identity.on_auth_change()
    }

    pub async fn phone_registered(&self, phone: &str) -> Result<bool, ChatError> {
        let query = Query::new(&self.config.phone_numbers_collection).where_eq(fields::PHONE, phone);
        let matches = self.feed.fetch(query).await.map_err(|e| {
            error!("Error checking phone number: {}", e);
            ChatError::from(e)
        })?;
        Ok(!matches.is_empty())
    }

    pub async fn register(&self, form: &RegistrationForm) -> Result<Participant, ChatError> {
        form.validate(self.config.min_password_length)?;
        let email = form.email.trim();
        let phone = form.phone.trim();

        if self.phone_registered(phone).await? {
            warn!("Registration refused, phone number already registered");
            return Err(ChatError::PhoneInUse);
        }

        let uid = self
            .identity
            .create_account(email, &form.password)
            .await
            .map_err(ChatError::from)
            .map_err(|e| match e {
                // Report our own threshold, the provider may not say
                ChatError::WeakPassword(_) => ChatError::WeakPassword(self.config.min_password_length),
                other => other,
            })?;

        let profile = UserProfile {
            email: email.to_string(),
            username: form.username.trim().to_string(),
            phone: phone.to_string(),
            created_at: Utc::now(),
        };
        let profile = serde_json::to_value(&profile).map_err(|e| ChatError::Backend(e.to_string()))?;
        self.feed
            .set(&self.config.users_collection, &uid, profile)
            .await
            .map_err(|e| {
                error!("Account {} created but profile could not be saved: {}", uid, e);
                ChatError::from(e)
            })?;
        self.feed
            .set(&self.config.phone_numbers_collection, &uid, json!({ "phone": phone }))
            .await
            .map_err(|e| {
                error!("Account {} created but phone number could not be saved: {}", uid, e);
                ChatError::from(e)
            })?;

        info!("Registered {}", uid);
        Ok(uid)
    }

    pub async fn login(&self, form: &LoginForm) -> Result<Participant, ChatError> {
        form.validate()?;
        let uid = self
            .identity
            .sign_in(form.email.trim(), &form.password)
            .await
            .map_err(|e| {
                warn!("Login failed: {}", e);
                ChatError::from(e)
            })?;
        info!("Logged in as {}", uid);
        Ok(uid)
    }

    pub async fn logout(&self) -> Result<(), ChatError> {
        self.identity.sign_out().await.map_err(|e| {
            error!("Error logging out: {}", e);
            ChatError::from(e)
        })
    }
}
