//! GitHub REST endpoints on top of [`Transport`].

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::Config;
use crate::models::RepoId;
use crate::paginate;
use crate::transport::{ApiResponse, Transport};

pub struct GitHub {
    transport: Transport,
    api_url: String,
    per_page: usize,
}

impl GitHub {
    pub fn new(transport: Transport, api_url: &str, per_page: usize) -> Self {
        Self {
            transport,
            api_url: api_url.trim_end_matches('/').to_string(),
            per_page: per_page.max(1),
        }
    }

    pub fn from_config(config: &Config, tokens: Vec<String>) -> Result<Self> {
        let transport = Transport::from_config(config, tokens)?;
        Ok(Self::new(transport, &config.github.api_url, config.github.per_page))
    }

    /// Whether any token is configured. GraphQL requires one.
    pub fn has_credentials(&self) -> bool {
        !self.transport.credentials().is_empty()
    }

    /// `{api}/repos/{owner}/{name}{suffix}`
    pub fn repo_url(&self, repo: &RepoId, suffix: &str) -> String {
        format!("{}/repos/{}/{}{}", self.api_url, repo.owner, repo.name, suffix)
    }

    pub fn get(&mut self, url: &str) -> Result<ApiResponse> {
        self.transport.get(url)
    }

    pub fn graphql(&mut self, query: &str, variables: Value) -> Result<Value> {
        self.transport.graphql(query, variables)
    }

    /// Every page of a listing, tagged with `repo`.
    pub fn paged<T: DeserializeOwned>(
        &mut self,
        url: &str,
        repo: &RepoId,
        max_pages: usize,
    ) -> Result<Vec<T>> {
        paginate::paged_get(&mut self.transport, url, repo, self.per_page, max_pages)
    }
}
