use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Repository name must be <organisation/owner>")]
pub struct ParseError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RepoName {
    pub(crate) owner: String,
    pub(crate) name: String,
}

impl FromStr for RepoName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let components: Vec<&str> = s.split('/').collect();
        match &components[..] {
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => Ok(RepoName {
                owner: owner.to_string(),
                name: repo.to_string(),
            }),
            _ => Err(ParseError {}),
        }
    }
}

impl std::fmt::Display for RepoName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_owner_and_name() {
        let repo: RepoName = "python/cpython".parse().unwrap();
        assert_eq!(repo.owner, "python");
        assert_eq!(repo.name, "cpython");
        assert_eq!(repo.to_string(), "python/cpython");
    }

    #[test]
    fn rejects_other_shapes() {
        assert!("cpython".parse::<RepoName>().is_err());
        assert!("a/b/c".parse::<RepoName>().is_err());
        assert!("/cpython".parse::<RepoName>().is_err());
    }
}
