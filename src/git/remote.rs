use std::fmt;

use serde::{Deserialize, Serialize};

/// Hosting service a remote points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    GitHub,
    GitLab,
    Bitbucket,
    Other,
}

impl Provider {
    fn from_host(host: &str) -> Self {
        let host = host.to_ascii_lowercase();
        if host == "github.com" || host.ends_with(".github.com") {
            Self::GitHub
        } else if host.contains("gitlab") {
            Self::GitLab
        } else if host == "bitbucket.org" || host.contains("bitbucket") {
            Self::Bitbucket
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitHub => write!(f, "GitHub"),
            Self::GitLab => write!(f, "GitLab"),
            Self::Bitbucket => write!(f, "Bitbucket"),
            Self::Other => write!(f, "Other"),
        }
    }
}

/// One entry of `git remote -v`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
    /// `None` for local-path remotes.
    pub host: Option<String>,
    /// Repository path on the host, without a trailing `.git`.
    pub path: Option<String>,
    pub provider: Provider,
}

/// Parse `git remote -v` output, keeping one entry per remote (the fetch URL).
pub fn parse_remotes(output: &str) -> Vec<Remote> {
    let mut remotes: Vec<Remote> = Vec::new();
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let (Some(name), Some(url)) = (fields.next(), fields.next()) else {
            continue;
        };
        let kind = fields.next().unwrap_or("(fetch)");
        if kind != "(fetch)" || remotes.iter().any(|r| r.name == name) {
            continue;
        }
        remotes.push(parse_remote(name, url));
    }
    remotes
}

fn parse_remote(name: &str, url: &str) -> Remote {
    let (host, path) = split_url(url).unzip();
    let provider = host.as_deref().map_or(Provider::Other, Provider::from_host);
    Remote {
        name: name.to_string(),
        url: url.to_string(),
        host,
        path,
        provider,
    }
}

/// Split a remote URL into `(host, path)`.
///
/// Handles `scheme://[user@]host[:port]/path` and scp-like `[user@]host:path`.
fn split_url(url: &str) -> Option<(String, String)> {
    let (host, path) = if let Some((_, rest)) = url.split_once("://") {
        let (authority, path) = rest.split_once('/')?;
        let host = authority.rsplit('@').next()?;
        let host = host.split(':').next()?;
        (host, path)
    } else {
        if url.starts_with('/') || url.starts_with('.') {
            return None;
        }
        let (authority, path) = url.split_once(':')?;
        let host = authority.rsplit('@').next()?;
        (host, path)
    };
    if host.is_empty() {
        return None;
    }
    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    Some((host.to_string(), path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scp_style_github_remote() {
        let remotes = parse_remotes(concat!(
            "origin\tgit@github.com:acme/app.git (fetch)\n",
            "origin\tgit@github.com:acme/app.git (push)\n",
        ));
        assert_eq!(remotes.len(), 1);
        let r = &remotes[0];
        assert_eq!(r.name, "origin");
        assert_eq!(r.host.as_deref(), Some("github.com"));
        assert_eq!(r.path.as_deref(), Some("acme/app"));
        assert_eq!(r.provider, Provider::GitHub);
    }

    #[test]
    fn parses_https_gitlab_remote() {
        let remotes = parse_remotes("upstream\thttps://gitlab.example.com/group/sub/proj (fetch)");
        let r = &remotes[0];
        assert_eq!(r.host.as_deref(), Some("gitlab.example.com"));
        assert_eq!(r.path.as_deref(), Some("group/sub/proj"));
        assert_eq!(r.provider, Provider::GitLab);
    }

    #[test]
    fn parses_ssh_url_with_port() {
        let remotes = parse_remotes("bb\tssh://git@bitbucket.org:7999/team/repo.git (fetch)");
        let r = &remotes[0];
        assert_eq!(r.host.as_deref(), Some("bitbucket.org"));
        assert_eq!(r.path.as_deref(), Some("team/repo"));
        assert_eq!(r.provider, Provider::Bitbucket);
    }

    #[test]
    fn local_path_remote_has_no_host() {
        let remotes = parse_remotes("local\t/srv/git/repo.git (fetch)");
        let r = &remotes[0];
        assert_eq!(r.host, None);
        assert_eq!(r.path, None);
        assert_eq!(r.provider, Provider::Other);
    }

    #[test]
    fn keeps_multiple_remotes_in_order() {
        let remotes = parse_remotes(
            "origin\tgit@github.com:me/app.git (fetch)\n\
             origin\tgit@github.com:me/app.git (push)\n\
             upstream\tgit@github.com:acme/app.git (fetch)\n\
             upstream\tgit@github.com:acme/app.git (push)\n",
        );
        let names: Vec<&str> = remotes.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["origin", "upstream"]);
    }

    #[test]
    fn ignores_malformed_lines() {
        assert!(parse_remotes("\njunk\n").is_empty());
    }

    #[test]
    fn self_hosted_is_other() {
        let remotes = parse_remotes("origin\thttps://git.internal.dev/app.git (fetch)");
        assert_eq!(remotes[0].provider, Provider::Other);
    }
}
