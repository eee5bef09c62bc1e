// Route templates
//
// A template is an optional `scheme://host:port` authority, a path of
// literal and `{name}` capture segments, and optional literal query
// constraints. Literal segments match case-insensitively; a capture binds
// exactly one path component. Query constraints are route metadata — they
// name the parameters a caller is expected to send and give the bare-name
// binding for them — but they never filter the incoming request's values:
// `/funk?x=4` matches a request for `/funk?x=3` and binds `x=3`.

use crate::error::{Result, TransportError};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Capture(String),
}

/// Parsed route template
#[derive(Debug, Clone)]
pub struct RouteTemplate {
    /// Original template text, used for pattern-based removal
    raw: String,
    /// `scheme://host:port` prefix, when the template pins an endpoint
    authority: Option<String>,
    segments: Vec<Segment>,
    query_constraints: Vec<(String, String)>,
}

impl RouteTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let raw = template.to_string();

        // Split off an authority prefix if the template is a full URL.
        let (authority, rest) = match template.find("://") {
            Some(scheme_end) => {
                let after = &template[scheme_end + 3..];
                match after.find('/') {
                    Some(slash) => (
                        Some(template[..scheme_end + 3 + slash].to_string()),
                        &after[slash..],
                    ),
                    None => (Some(template.to_string()), "/"),
                }
            }
            None => (None, template),
        };

        let (path_part, query_part) = match rest.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (rest, None),
        };

        if !path_part.starts_with('/') {
            return Err(TransportError::InvalidConfig(format!(
                "route template '{}' must start with '/'",
                template
            )));
        }

        let mut segments = Vec::new();
        for piece in path_part.split('/').filter(|p| !p.is_empty()) {
            if let Some(name) = piece.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                if name.is_empty() {
                    return Err(TransportError::InvalidConfig(format!(
                        "route template '{}' has an unnamed capture",
                        template
                    )));
                }
                segments.push(Segment::Capture(name.to_string()));
            } else if piece.contains('{') || piece.contains('}') {
                return Err(TransportError::InvalidConfig(format!(
                    "route template '{}' has a malformed capture segment '{}'",
                    template, piece
                )));
            } else {
                segments.push(Segment::Literal(piece.to_string()));
            }
        }

        let mut query_constraints = Vec::new();
        if let Some(query) = query_part {
            for piece in query.split('&').filter(|p| !p.is_empty()) {
                let (name, value) = piece.split_once('=').unwrap_or((piece, ""));
                query_constraints.push((name.to_string(), value.to_string()));
            }
        }

        Ok(Self {
            raw,
            authority,
            segments,
            query_constraints,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Match a request path, returning capture bindings on success.
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let components: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if components.len() != self.segments.len() {
            return None;
        }
        let mut captures = Vec::new();
        for (segment, component) in self.segments.iter().zip(&components) {
            match segment {
                Segment::Literal(lit) => {
                    if !lit.eq_ignore_ascii_case(component) {
                        return None;
                    }
                }
                Segment::Capture(name) => {
                    captures.push((name.clone(), (*component).to_string()));
                }
            }
        }
        Some(captures)
    }

    /// Whether the template pins this endpoint to another authority than
    /// the one serving the request.
    pub fn matches_authority(&self, request_host: Option<&str>) -> bool {
        match (&self.authority, request_host) {
            (None, _) => true,
            (Some(auth), Some(host)) => {
                // Compare host:port, tolerating a scheme on the template.
                let auth_host = auth.split("://").nth(1).unwrap_or(auth);
                auth_host.eq_ignore_ascii_case(host)
            }
            (Some(_), None) => false,
        }
    }

    /// Whether a query parameter name is declared as a constraint, meaning
    /// its request value binds under the bare name.
    pub fn declares_query(&self, name: &str) -> bool {
        self.query_constraints.iter().any(|(n, _)| n == name)
    }

    pub fn query_constraints(&self) -> &[(String, String)] {
        &self.query_constraints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_binds_one_component() {
        let template = RouteTemplate::parse("/test/{x}/hhh").unwrap();
        let captures = template.matches("/test/abc/hhh").unwrap();
        assert_eq!(captures, vec![("x".to_string(), "abc".to_string())]);

        assert!(template.matches("/test/abc/def/hhh").is_none());
        assert!(template.matches("/test/hhh").is_none());
    }

    #[test]
    fn test_literals_match_case_insensitively() {
        let template = RouteTemplate::parse("/Test/{x}/HHH").unwrap();
        assert!(template.matches("/test/v/hhh").is_some());
        assert!(template.matches("/TEST/v/hHh").is_some());
    }

    #[test]
    fn test_query_constraint_is_metadata_not_filter() {
        let template = RouteTemplate::parse("/funk?x=4").unwrap();
        // The path still matches whatever the request's x actually is.
        assert!(template.matches("/funk").is_some());
        assert!(template.declares_query("x"));
        assert!(!template.declares_query("y"));
    }

    #[test]
    fn test_authority_prefix() {
        let template = RouteTemplate::parse("http://box:9161/svc/{id}").unwrap();
        assert!(template.matches("/svc/7").is_some());
        assert!(template.matches_authority(Some("box:9161")));
        assert!(!template.matches_authority(Some("other:9161")));
        assert!(!template.matches_authority(None));

        let plain = RouteTemplate::parse("/svc/{id}").unwrap();
        assert!(plain.matches_authority(None));
        assert!(plain.matches_authority(Some("anything:1")));
    }

    #[test]
    fn test_malformed_templates_rejected() {
        assert!(RouteTemplate::parse("no-leading-slash").is_err());
        assert!(RouteTemplate::parse("/a/{}").is_err());
        assert!(RouteTemplate::parse("/a/{open").is_err());
    }

    #[test]
    fn test_root_template() {
        let template = RouteTemplate::parse("/").unwrap();
        assert!(template.matches("/").is_some());
        assert!(template.matches("/x").is_none());
    }
}
