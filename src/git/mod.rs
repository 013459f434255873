use crate::error::{Result, WebhookError};

/// A repository identity parsed from a Git URL, all components lowercased.
///
/// The server component keeps its scheme prefix so that re-deriving
/// `{server}/{owner}/{repo}` reproduces the (stripped, lowercased) input URL.
/// Every repository-identity comparison in the crate goes through this type;
/// comparing raw URL strings anywhere else silently diverges on case or
/// `.git` suffixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRepoId {
    pub server: String,
    pub owner: String,
    pub repo: String,
}

impl GitRepoId {
    /// Parse a repository URL into its (server, owner, repo) components.
    ///
    /// The URL must carry an `http://` or `https://` scheme and at least an
    /// owner and repository path segment. A trailing slash and a `.git`
    /// suffix are stripped.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.to_lowercase();

        let (prefix, rest) = if let Some(rest) = url.strip_prefix("https://") {
            ("https://", rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            ("http://", rest)
        } else {
            return Err(WebhookError::Validation(format!(
                "URL {} does not specify the protocol http:// or https://",
                url
            )));
        };

        // example at this point: github.com/tektoncd/pipeline
        let rest = rest.trim_end_matches('/');
        let rest = rest.strip_suffix(".git").unwrap_or(rest);

        let mut pieces = rest.split('/');
        let server = pieces.next().unwrap_or_default();
        let owner = pieces.next().unwrap_or_default();
        let repo: Vec<&str> = pieces.collect();

        if owner.is_empty() || repo.is_empty() || repo.iter().any(|p| p.is_empty()) {
            return Err(WebhookError::Validation(
                "URL didn't contain an owner and repository".to_string(),
            ));
        }

        // Subgroup paths (GitLab) keep everything between server and the last
        // segment as the owner.
        let (owner, repo) = match repo.split_last() {
            Some((last, init)) if !init.is_empty() => {
                (format!("{}/{}", owner, init.join("/")), last.to_string())
            },
            Some((last, _)) => (owner.to_string(), last.to_string()),
            None => {
                return Err(WebhookError::Validation(
                    "URL didn't contain an owner and repository".to_string(),
                ));
            },
        };

        Ok(Self {
            server: format!("{}{}", prefix, server),
            owner,
            repo,
        })
    }

    /// Structural equality of two repository URLs; parse errors from either
    /// input propagate.
    pub fn compare(url1: &str, url2: &str) -> Result<bool> {
        let id1 = Self::parse(url1)?;
        let id2 = Self::parse(url2)?;
        Ok(id1 == id2)
    }

    /// The server component without its scheme, as used in pipeline
    /// parameters and PipelineRun labels.
    pub fn server_host(&self) -> &str {
        self.server
            .trim_start_matches("https://")
            .trim_start_matches("http://")
    }

    /// Name prefix shared by all monitor triggers for this repository.
    pub fn monitor_prefix(&self) -> String {
        format!("{}.{}-", self.owner, self.repo)
    }

    /// Full normalized URL, `{server}/{owner}/{repo}`.
    pub fn url(&self) -> String {
        format!("{}/{}/{}", self.server, self.owner, self.repo)
    }
}

/// Git provider kind derived from a repository URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitProvider {
    GitHub,
    GitLab,
}

impl GitProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitProvider::GitHub => "github",
            GitProvider::GitLab => "gitlab",
        }
    }
}

/// Derive the provider and its REST API base URL from a repository URL.
///
/// github.com maps to the public API host; other GitHub (Enterprise) and
/// GitLab servers expose their API under the server itself.
pub fn provider_and_api_url(repo_url: &str) -> Result<(GitProvider, String)> {
    let id = GitRepoId::parse(repo_url)?;
    let host = id.server_host();

    if host == "github.com" {
        Ok((GitProvider::GitHub, "https://api.github.com/".to_string()))
    } else if host.contains("github") {
        Ok((GitProvider::GitHub, format!("{}/api/v3/", id.server)))
    } else if host.contains("gitlab") {
        Ok((GitProvider::GitLab, format!("{}/api/v4/", id.server)))
    } else {
        Err(WebhookError::Validation(format!(
            "no supported Git provider recognized from URL {}",
            repo_url
        )))
    }
}
