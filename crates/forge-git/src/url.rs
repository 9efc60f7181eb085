//! Repository URL helpers

/// Project name of a repository URL: its last path segment without `.git`.
///
/// Handles https, ssh:// and scp-style (`git@host:org/repo.git`) URLs.
pub fn extract_project_name(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    let path = match trimmed.split_once("://") {
        Some((_, rest)) => rest,
        None => match trimmed.split_once(':') {
            // scp-style: user@host:path
            Some((_, rest)) => rest,
            None => trimmed,
        },
    };

    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_project_name() {
        let cases = [
            ("https://gitlab.com/user/my-project.git", "my-project"),
            ("https://github.com/tektoncd/pipeline", "pipeline"),
            ("git@github.com:tektoncd/triggers.git", "triggers"),
            ("ssh://git@git.example.com:2222/org/api.git", "api"),
            ("https://git.example.com/org/web/", "web"),
            ("repo", "repo"),
        ];
        for (url, expected) in cases {
            assert_eq!(extract_project_name(url), expected, "url {url}");
        }
    }
}
