//! Compact text form for resource bundles.
//!
//! `"cpus:2;mem:1024"`, `"cpus(role1):0.5;ports:[31000-32000]"`,
//! `"tags:{a,b}"`. Reservations written in parentheses parse as static.
//! Tests and fixtures use this form throughout.

use std::str::FromStr;

use crate::bundle::ResourceBundle;
use crate::error::ResourceError;
use crate::resource::Resource;

impl FromStr for Resource {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (head, value) = s
            .split_once(':')
            .ok_or_else(|| ResourceError::Parse(format!("missing ':' in {s:?}")))?;

        let (name, role) = match head.split_once('(') {
            Some((name, rest)) => {
                let role = rest
                    .strip_suffix(')')
                    .ok_or_else(|| ResourceError::Parse(format!("unclosed '(' in {head:?}")))?;
                (name.trim(), Some(role.trim()))
            }
            None => (head.trim(), None),
        };
        if name.is_empty() {
            return Err(ResourceError::Parse(format!("empty name in {s:?}")));
        }

        let value = value.trim();
        let mut resource = if let Some(inner) = value
            .strip_prefix('[')
            .and_then(|v| v.strip_suffix(']'))
        {
            Resource::ranges(name, parse_ranges(inner)?)
        } else if let Some(inner) = value
            .strip_prefix('{')
            .and_then(|v| v.strip_suffix('}'))
        {
            Resource::set(
                name,
                inner
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty()),
            )
        } else {
            let amount: f64 = value
                .parse()
                .map_err(|_| ResourceError::Parse(format!("bad scalar {value:?}")))?;
            Resource::scalar(name, amount)
        };

        if let Some(role) = role {
            resource = resource.reserved_for(role);
        }
        Ok(resource)
    }
}

fn parse_ranges(inner: &str) -> Result<Vec<(u64, u64)>, ResourceError> {
    inner
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (start, end) = part
                .split_once('-')
                .ok_or_else(|| ResourceError::Parse(format!("bad range {part:?}")))?;
            let start = start
                .trim()
                .parse()
                .map_err(|_| ResourceError::Parse(format!("bad range start {part:?}")))?;
            let end = end
                .trim()
                .parse()
                .map_err(|_| ResourceError::Parse(format!("bad range end {part:?}")))?;
            Ok((start, end))
        })
        .collect()
}

impl FromStr for ResourceBundle {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Resource::from_str)
            .collect::<Result<_, _>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Ranges, Scalar};

    #[test]
    fn parses_scalars_with_roles() {
        let b: ResourceBundle = "cpus:2;mem(role1):1024;disk:0".parse().unwrap();
        assert_eq!(b.scalar("cpus"), Scalar::from(2.0));
        assert_eq!(b.reserved("role1").scalar("mem"), Scalar::from(1024.0));
        // Zero-quantity entries canonicalize away.
        assert!(!b.has_name("disk"));
    }

    #[test]
    fn parses_ranges_and_sets() {
        let b: ResourceBundle = "ports:[31000-32000, 33000-33000];tags:{a, b}"
            .parse()
            .unwrap();
        let ports = b.iter().find(|r| r.name == "ports").unwrap();
        match &ports.value {
            crate::Value::Ranges(r) => assert_eq!(*r, Ranges::new([(31000, 32000), (33000, 33000)])),
            other => panic!("expected ranges, got {other:?}"),
        }
        let tags = b.iter().find(|r| r.name == "tags").unwrap();
        match &tags.value {
            crate::Value::Set(items) => assert_eq!(items.len(), 2),
            other => panic!("expected set, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_input() {
        assert!("cpus".parse::<ResourceBundle>().is_err());
        assert!("cpus(role:1".parse::<ResourceBundle>().is_err());
        assert!("cpus:abc".parse::<ResourceBundle>().is_err());
        assert!("ports:[31000]".parse::<ResourceBundle>().is_err());
    }

    #[test]
    fn fractional_scalars() {
        let b: ResourceBundle = "cpus:0.005".parse().unwrap();
        assert_eq!(b.scalar("cpus"), Scalar::from_millis(5));
    }
}
