//! Request/response access to the note store.
//!
//! Storage and membership live behind a REST API; this module only consumes
//! it. [`NoteService`] is the seam the directory and the note library are
//! written against, [`HttpNoteService`] the production implementation.

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::config::ServiceConfig;
use crate::model::{Collaborator, Note, NoteId, UserId};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} answered {status}")]
    Status { status: u16, url: String },
    #[error("Unexpected response body: {0}")]
    Decode(String),
    #[error("Invalid service URL `{0}`")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// The note store as seen from a client.
#[async_trait]
pub trait NoteService: Send + Sync {
    /// Notes the user owns or collaborates on.
    async fn list_notes(&self, email: &str) -> Result<Vec<Note>>;

    /// Create an empty note owned by `owner_email`.
    async fn create_note(&self, owner_email: &str, title: &str) -> Result<Note>;

    async fn delete_note(&self, note: NoteId) -> Result<()>;

    async fn list_collaborators(&self, note: NoteId) -> Result<Vec<Collaborator>>;

    async fn add_collaborator(&self, note: NoteId, email: &str) -> Result<()>;

    async fn remove_collaborator(&self, note: NoteId, email: &str) -> Result<()>;
}

#[derive(Serialize)]
struct NewNote<'a> {
    title: &'a str,
    content: &'a str,
    collaborators: [UserId; 0],
}

/// [`NoteService`] over HTTP.
pub struct HttpNoteService {
    client: reqwest::Client,
    base: Url,
}

impl HttpNoteService {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|_| ServiceError::InvalidUrl(config.base_url.clone()))?;
        if base.cannot_be_a_base() {
            return Err(ServiceError::InvalidUrl(config.base_url));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, base })
    }

    /// `{base}/note/{segments...}`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("note").extend(segments);
        }
        url
    }

    fn membership_endpoint(&self, action: &str, note: NoteId, email: &str) -> Url {
        let mut url = self.endpoint(&[action]);
        url.query_pairs_mut()
            .append_pair("noteId", &note.to_string())
            .append_pair("userEmail", email);
        url
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&NewNote<'_>>,
    ) -> Result<reqwest::Response> {
        log::debug!("{method} {url}");
        let mut request = self.client.request(method, url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ServiceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl NoteService for HttpNoteService {
    async fn list_notes(&self, email: &str) -> Result<Vec<Note>> {
        let url = self.endpoint(&["getByUserEmail", email]);
        match self.send(Method::GET, url, None).await {
            Ok(response) => Self::decode(response).await,
            // The store answers 404 rather than an empty list.
            Err(ServiceError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn create_note(&self, owner_email: &str, title: &str) -> Result<Note> {
        let url = self.endpoint(&["create", owner_email]);
        let body = NewNote {
            title,
            content: "",
            collaborators: [],
        };
        let response = self.send(Method::POST, url, Some(&body)).await?;
        Self::decode(response).await
    }

    async fn delete_note(&self, note: NoteId) -> Result<()> {
        let url = self.endpoint(&["delete", &note.to_string()]);
        self.send(Method::DELETE, url, None).await?;
        Ok(())
    }

    async fn list_collaborators(&self, note: NoteId) -> Result<Vec<Collaborator>> {
        let url = self.endpoint(&["getCollaborators", &note.to_string()]);
        let response = self.send(Method::GET, url, None).await?;
        Self::decode(response).await
    }

    async fn add_collaborator(&self, note: NoteId, email: &str) -> Result<()> {
        let url = self.membership_endpoint("addCollaborator", note, email);
        self.send(Method::POST, url, None).await?;
        Ok(())
    }

    async fn remove_collaborator(&self, note: NoteId, email: &str) -> Result<()> {
        let url = self.membership_endpoint("removeCollaborator", note, email);
        self.send(Method::DELETE, url, None).await?;
        Ok(())
    }
}
