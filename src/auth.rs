//! Authentication and workspace membership seam
//!
//! Identity is owned by another service; the stream endpoint only needs two
//! answers: who does this token belong to, and is that user a member of the
//! requested workspace. The trait keeps the endpoint testable and lets the
//! host application plug in its real directory.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;

#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolve a bearer token to a user id. None means unauthenticated.
    async fn authenticate(&self, token: &str) -> Option<Uuid>;

    /// Whether the user is a member of the workspace.
    async fn is_member(&self, user_id: Uuid, workspace_id: Uuid) -> bool;
}

/// Extract the bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

/// In-memory directory for development and tests.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    tokens: HashMap<String, Uuid>,
    members: HashMap<Uuid, HashSet<Uuid>>,
}

#[derive(Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    tokens: HashMap<String, Uuid>,
    /// workspace id -> member user ids
    #[serde(default)]
    workspaces: HashMap<Uuid, Vec<Uuid>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from inline JSON:
    /// `{"tokens": {"<token>": "<user uuid>"}, "workspaces": {"<workspace uuid>": ["<user uuid>"]}}`
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let file: DirectoryFile = serde_json::from_str(json)
            .map_err(|e| AppError::Config(format!("DIRECTORY_JSON invalid: {e}")))?;

        let mut directory = Self::new();
        directory.tokens = file.tokens;
        for (workspace_id, users) in file.workspaces {
            for user_id in users {
                directory.add_member(workspace_id, user_id);
            }
        }
        Ok(directory)
    }

    pub fn insert_token(&mut self, token: impl Into<String>, user_id: Uuid) {
        self.tokens.insert(token.into(), user_id);
    }

    pub fn add_member(&mut self, workspace_id: Uuid, user_id: Uuid) {
        self.members.entry(workspace_id).or_default().insert(user_id);
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn authenticate(&self, token: &str) -> Option<Uuid> {
        self.tokens.get(token).copied()
    }

    async fn is_member(&self, user_id: Uuid, workspace_id: Uuid) -> bool {
        self.members
            .get(&workspace_id)
            .is_some_and(|members| members.contains(&user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_directory_resolves_tokens_and_membership() {
        let user = Uuid::new_v4();
        let workspace = Uuid::new_v4();
        let mut directory = StaticDirectory::new();
        directory.insert_token("alice-token", user);
        directory.add_member(workspace, user);

        assert_eq!(directory.authenticate("alice-token").await, Some(user));
        assert_eq!(directory.authenticate("bogus").await, None);
        assert!(directory.is_member(user, workspace).await);
        assert!(!directory.is_member(Uuid::new_v4(), workspace).await);
    }

    #[tokio::test]
    async fn directory_loads_from_json() {
        let user = Uuid::new_v4();
        let workspace = Uuid::new_v4();
        let json = serde_json::json!({
            "tokens": { "tok": user },
            "workspaces": { (workspace.to_string()): [user] },
        })
        .to_string();

        let directory = StaticDirectory::from_json(&json).unwrap();
        assert_eq!(directory.authenticate("tok").await, Some(user));
        assert!(directory.is_member(user, workspace).await);

        assert!(StaticDirectory::from_json("not json").is_err());
    }

    #[test]
    fn bearer_token_requires_the_bearer_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
