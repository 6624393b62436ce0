//! Origin classification: a single entry
//! point classifies an install string into one of the origin classes in
//! precedence order, github/gitlab/bitbucket first so a generic git host
//! never shadows a known forge.

/// One classified install origin, already carrying everything
/// [`crate::acquire`] needs to fetch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Github { clone_url: String, branch: String, subpath: Option<String> },
    Gitlab { clone_url: String, branch: String, subpath: Option<String> },
    Bitbucket { clone_url: String, branch: String, subpath: Option<String> },
    GenericGit { clone_url: String },
    Npm { package: String, version: String },
    Pip { package: String, version: String },
    Tarball { download_url: String },
    LocalFile { path: String },
}

impl Origin {
    /// A short type tag used in cache-key derivation and the install
    /// filesystem layout (`<type>/<name>`) step 3.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Origin::Github { .. } => "github",
            Origin::Gitlab { .. } => "gitlab",
            Origin::Bitbucket { .. } => "bitbucket",
            Origin::GenericGit { .. } => "git",
            Origin::Npm { .. } => "npm",
            Origin::Pip { .. } => "pip",
            Origin::Tarball { .. } => "tarball",
            Origin::LocalFile { .. } => "local",
        }
    }

    /// The name used both as the cache-key component and the leaf
    /// directory under `<type>/<name>`.
    pub fn full_name(&self) -> String {
        match self {
            Origin::Github { clone_url, .. }
            | Origin::Gitlab { clone_url, .. }
            | Origin::Bitbucket { clone_url, .. }
            | Origin::GenericGit { clone_url } => repo_name_from_clone_url(clone_url),
            Origin::Npm { package, .. } => package.clone(),
            Origin::Pip { package, .. } => package.clone(),
            Origin::Tarball { download_url } => repo_name_from_clone_url(download_url),
            Origin::LocalFile { path } => std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "local".to_string()),
        }
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            Origin::Npm { version, .. } | Origin::Pip { version, .. } => Some(version.as_str()),
            _ => None,
        }
    }

    /// The origin URL as it should be recorded on the `ServerRecord`
    /// (`install_url`), and re-used verbatim by `update()`.
    pub fn source_url(&self) -> String {
        match self {
            Origin::Github { clone_url, .. }
            | Origin::Gitlab { clone_url, .. }
            | Origin::Bitbucket { clone_url, .. }
            | Origin::GenericGit { clone_url } => clone_url.clone(),
            Origin::Npm { package, version } => format!("npm:{package}@{version}"),
            Origin::Pip { package, version } => format!("pip:{package}=={version}"),
            Origin::Tarball { download_url } => download_url.clone(),
            Origin::LocalFile { path } => format!("file://{path}"),
        }
    }
}

fn repo_name_from_clone_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    trimmed
        .rsplit('/')
        .next()
        .unwrap_or(trimmed)
        .to_string()
}

/// Compiled once per call site rather than cached in a `static`: origin
/// parsing happens once per `install()` invocation, never on a hot path,
/// so the extra compile cost isn't worth a `OnceLock` plumbing dance.
mod patterns {
    use regex::Regex;

    pub fn github() -> Regex {
        Regex::new(r"^https?://github\.com/([^/]+)/([^/]+?)(?:\.git)?(?:/tree/([^/]+)(?:/(.*))?)?/?$").unwrap()
    }
    pub fn gitlab() -> Regex {
        Regex::new(r"^https?://gitlab\.com/([^/]+)/([^/]+?)(?:\.git)?(?:/-/tree/([^/]+)(?:/(.*))?)?/?$").unwrap()
    }
    pub fn bitbucket() -> Regex {
        Regex::new(r"^https?://bitbucket\.org/([^/]+)/([^/]+?)(?:\.git)?(?:/src/([^/]+)(?:/(.*))?)?/?$").unwrap()
    }
    pub fn generic_git() -> Regex {
        Regex::new(r"^git\+https?://.+\.git$").unwrap()
    }
    pub fn tarball() -> Regex {
        Regex::new(r"^https?://.+\.(tar\.gz|tgz|zip)$").unwrap()
    }
    pub fn local_file() -> Regex {
        Regex::new(r"^file://(/.+)$").unwrap()
    }
    pub fn npm() -> Regex {
        Regex::new(r"^(?:npm:)?(@[^/@]+/[^@]+|[^@/]+)(?:@(.+))?$").unwrap()
    }
    pub fn pip() -> Regex {
        Regex::new(r"^(?:pip:|pypi:)?([A-Za-z0-9_.\-]+)(?:==(.+))?$").unwrap()
    }
}

/// Classify an install string, in precedence order:
/// github, gitlab, bitbucket, generic git, npm, pip, tarball, local file,
/// falling back to npm for any remaining bare token.
pub fn parse(input: &str) -> Origin {
    let input = input.trim();

    if let Some(caps) = patterns::github().captures(input) {
        return Origin::Github {
            clone_url: format!(
                "https://github.com/{}/{}",
                &caps[1],
                caps[2].trim_end_matches(".git")
            ),
            branch: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_else(|| "main".to_string()),
            subpath: caps.get(4).map(|m| m.as_str().to_string()),
        };
    }
    if let Some(caps) = patterns::gitlab().captures(input) {
        return Origin::Gitlab {
            clone_url: format!("https://gitlab.com/{}/{}", &caps[1], caps[2].trim_end_matches(".git")),
            branch: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_else(|| "main".to_string()),
            subpath: caps.get(4).map(|m| m.as_str().to_string()),
        };
    }
    if let Some(caps) = patterns::bitbucket().captures(input) {
        return Origin::Bitbucket {
            clone_url: format!("https://bitbucket.org/{}/{}", &caps[1], caps[2].trim_end_matches(".git")),
            branch: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_else(|| "main".to_string()),
            subpath: caps.get(4).map(|m| m.as_str().to_string()),
        };
    }
    if patterns::generic_git().is_match(input) {
        return Origin::GenericGit {
            clone_url: input.trim_start_matches("git+").to_string(),
        };
    }
    if let Some(caps) = patterns::local_file().captures(input) {
        return Origin::LocalFile {
            path: caps[1].to_string(),
        };
    }
    if patterns::tarball().is_match(input) {
        return Origin::Tarball {
            download_url: input.to_string(),
        };
    }
    if let Some(stripped) = input.strip_prefix("pip:").or_else(|| input.strip_prefix("pypi:")) {
        if let Some(caps) = patterns::pip().captures(stripped) {
            return Origin::Pip {
                package: caps[1].to_string(),
                version: caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_else(|| "latest".to_string()),
            };
        }
    }
    if let Some(caps) = patterns::npm().captures(input) {
        if input.starts_with("npm:") || caps[1].starts_with('@') {
            return Origin::Npm {
                package: caps[1].to_string(),
                version: caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_else(|| "latest".to_string()),
            };
        }
    }

    // Fallback: any remaining bare token is treated as an npm package.
    let caps = patterns::npm().captures(input);
    match caps {
        Some(caps) => Origin::Npm {
            package: caps[1].to_string(),
            version: caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_else(|| "latest".to_string()),
        },
        None => Origin::Npm {
            package: input.to_string(),
            version: "latest".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_github_url_with_tree_and_subpath() {
        let origin = parse("https://github.com/example/my-mcp/tree/main/packages/server");
        match origin {
            Origin::Github { clone_url, branch, subpath } => {
                assert_eq!(clone_url, "https://github.com/example/my-mcp");
                assert_eq!(branch, "main");
                assert_eq!(subpath.as_deref(), Some("packages/server"));
            }
            other => panic!("expected Github, got {other:?}"),
        }
    }

    #[test]
    fn parses_bare_github_url_defaulting_branch() {
        let origin = parse("https://github.com/example/my-mcp");
        match origin {
            Origin::Github { branch, subpath, .. } => {
                assert_eq!(branch, "main");
                assert!(subpath.is_none());
            }
            other => panic!("expected Github, got {other:?}"),
        }
    }

    #[test]
    fn parses_scoped_npm_package_with_version() {
        let origin = parse("@scope/name@1.2.3");
        assert_eq!(
            origin,
            Origin::Npm {
                package: "@scope/name".to_string(),
                version: "1.2.3".to_string()
            }
        );
    }

    #[test]
    fn parses_pip_package_with_pinned_version() {
        let origin = parse("pip:requests==2.31.0");
        assert_eq!(
            origin,
            Origin::Pip {
                package: "requests".to_string(),
                version: "2.31.0".to_string()
            }
        );
    }

    #[test]
    fn parses_tarball_url() {
        let origin = parse("https://example.com/dist/my-server-1.0.0.tar.gz");
        assert!(matches!(origin, Origin::Tarball { .. }));
    }

    #[test]
    fn parses_local_file_url() {
        let origin = parse("file:///home/me/my-server");
        assert_eq!(
            origin,
            Origin::LocalFile {
                path: "/home/me/my-server".to_string()
            }
        );
    }

    #[test]
    fn bare_token_falls_back_to_npm_latest() {
        let origin = parse("my-mcp-server");
        assert_eq!(
            origin,
            Origin::Npm {
                package: "my-mcp-server".to_string(),
                version: "latest".to_string()
            }
        );
    }
}
