//! The `Visitor` access grant and its creation payload.
//!
//! A visitor is identified by an opaque UUID token that travels in a URL query
//! parameter. Validity is checked on every use:
//! - inactive visitors are refused,
//! - expired visitors are refused,
//! - visitors with a visit limit of zero are refused at token admission.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{config::VISITOR_QUERYSTRING_KEY, error::VisitorError};

const RELATIVE_BASE: &str = "http://relative.invalid";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Visitor {
    pub uuid: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub scope: String,
    #[schema(value_type = Object)]
    pub context: Value,
    pub visits_remaining: Option<i32>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

/// What a visitor leaves behind in the session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorSessionData {
    pub uuid: Uuid,
}

impl Visitor {
    /// Materialize a new visitor from its creation payload.
    #[must_use]
    pub fn from_new(new: NewVisitor, now: OffsetDateTime) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            email: new.email,
            first_name: new.first_name,
            last_name: new.last_name,
            scope: new.scope,
            context: new.context.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            visits_remaining: new.visits_remaining,
            is_active: true,
            created_at: now,
            last_updated_at: now,
            expires_at: new.expires_at,
        }
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    #[must_use]
    pub fn has_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    #[must_use]
    pub fn has_visits_remaining(&self) -> bool {
        self.visits_remaining.map_or(true, |remaining| remaining > 0)
    }

    /// Active and not expired. Visits are not considered.
    #[must_use]
    pub fn is_valid(&self, now: OffsetDateTime) -> bool {
        self.is_active && !self.has_expired(now)
    }

    /// Whether a token for this visitor may open a new visit.
    #[must_use]
    pub fn is_admissible(&self, now: OffsetDateTime) -> bool {
        self.is_valid(now) && self.has_visits_remaining()
    }

    /// # Errors
    /// Returns the first reason the visitor would be refused at token admission.
    pub fn validate(&self, now: OffsetDateTime) -> Result<(), VisitorError> {
        if !self.is_active {
            return Err(VisitorError::Inactive);
        }
        if self.has_expired(now) {
            return Err(VisitorError::Expired);
        }
        if !self.has_visits_remaining() {
            return Err(VisitorError::NoVisitsRemaining);
        }
        Ok(())
    }

    #[must_use]
    pub fn session_data(&self) -> VisitorSessionData {
        VisitorSessionData { uuid: self.uuid }
    }

    /// Attach this visitor's token to `url` under the default query key.
    ///
    /// # Errors
    /// Returns `VisitorError::InvalidUrl` when `url` cannot be parsed.
    pub fn tokenise(&self, url: &str) -> Result<String, VisitorError> {
        self.tokenise_with_key(url, VISITOR_QUERYSTRING_KEY)
    }

    /// Attach this visitor's token to `url`, replacing any previous token and
    /// keeping the other query parameters and the fragment. Relative URLs stay
    /// relative.
    ///
    /// # Errors
    /// Returns `VisitorError::InvalidUrl` when `url` cannot be parsed.
    pub fn tokenise_with_key(&self, url: &str, key: &str) -> Result<String, VisitorError> {
        let (mut parsed, relative) = parse_link_target(url)?;

        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(name, _)| name != key)
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        parsed
            .query_pairs_mut()
            .clear()
            .extend_pairs(pairs)
            .append_pair(key, &self.uuid.to_string());

        if !relative {
            return Ok(parsed.into());
        }

        let mut tokenised = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            tokenised.push('?');
            tokenised.push_str(query);
        }
        if let Some(fragment) = parsed.fragment() {
            tokenised.push('#');
            tokenised.push_str(fragment);
        }
        Ok(tokenised)
    }
}

/// Check that `url` can later be tokenised.
///
/// # Errors
/// Returns `VisitorError::InvalidUrl` when `url` cannot be parsed.
pub fn validate_link_target(url: &str) -> Result<(), VisitorError> {
    parse_link_target(url).map(|_| ())
}

/// Parse an absolute URL, or a relative one against a placeholder base. The
/// flag tells whether the input was relative.
fn parse_link_target(url: &str) -> Result<(Url, bool), VisitorError> {
    match Url::parse(url) {
        Ok(parsed) => Ok((parsed, false)),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(RELATIVE_BASE)
            .and_then(|base| base.join(url))
            .map(|joined| (joined, true))
            .map_err(|e| VisitorError::InvalidUrl(e.to_string())),
        Err(e) => Err(VisitorError::InvalidUrl(e.to_string())),
    }
}

/// Payload used to grant a new visitor.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct NewVisitor {
    pub email: String,
    pub scope: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[schema(value_type = Option<Object>)]
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub visits_remaining: Option<i32>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl NewVisitor {
    #[must_use]
    pub fn new(email: &str, scope: &str) -> Self {
        Self {
            email: email.to_string(),
            scope: scope.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_visits_remaining(mut self, visits: i32) -> Self {
        self.visits_remaining = Some(visits);
        self
    }

    #[must_use]
    pub fn with_expires_at(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Fill in `expires_at` from the configured token lifetime when the caller
    /// did not pick one.
    ///
    /// # Errors
    /// Returns `ExpiryOutOfRange` when `now + expiry` is not a representable date.
    pub fn with_default_expiry(
        mut self,
        expiry: Option<Duration>,
        now: OffsetDateTime,
    ) -> Result<Self, VisitorError> {
        if self.expires_at.is_none() {
            self.expires_at = expiry_from(now, expiry)?;
        }
        Ok(self)
    }

    /// Normalize the email and check the payload is usable.
    ///
    /// # Errors
    /// Returns `InvalidEmail` or `MissingScope`.
    pub fn normalized(mut self) -> Result<Self, VisitorError> {
        self.email = normalize_email(&self.email);
        if !valid_email(&self.email) {
            return Err(VisitorError::InvalidEmail);
        }
        self.scope = self.scope.trim().to_string();
        if self.scope.is_empty() {
            return Err(VisitorError::MissingScope);
        }
        if self.visits_remaining.is_some_and(|visits| visits < 0) {
            self.visits_remaining = Some(0);
        }
        Ok(self)
    }
}

/// `now + expiry`, or `None` when there is no expiry.
///
/// # Errors
/// Returns `ExpiryOutOfRange` when the sum overflows the date range.
pub fn expiry_from(
    now: OffsetDateTime,
    expiry: Option<Duration>,
) -> Result<Option<OffsetDateTime>, VisitorError> {
    expiry
        .map(|expiry| now.checked_add(expiry).ok_or(VisitorError::ExpiryOutOfRange))
        .transpose()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}
