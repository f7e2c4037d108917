//! Cache key construction
//!
//! Keys are colon separated: a prefix, positional parts, then keyword parts
//! rendered as `k=v` in sorted order so the same query always produces the
//! same key regardless of argument order.

use std::fmt::Display;

pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// Build `prefix:arg1:arg2:k1=v1:k2=v2` with keyword parts sorted by key.
    pub fn build<A, K, V>(prefix: &str, args: &[A], kwargs: &[(K, V)]) -> String
    where
        A: Display,
        K: AsRef<str>,
        V: Display,
    {
        let mut parts: Vec<String> = Vec::with_capacity(1 + args.len() + kwargs.len());
        parts.push(prefix.to_string());
        parts.extend(args.iter().map(|a| a.to_string()));

        let mut pairs: Vec<(&str, String)> = kwargs
            .iter()
            .map(|(k, v)| (k.as_ref(), v.to_string()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(&b.1)));
        parts.extend(pairs.into_iter().map(|(k, v)| format!("{}={}", k, v)));

        parts.join(":")
    }

    pub fn user(id: impl Display) -> String {
        format!("user:{}", id)
    }

    pub fn post(id: impl Display) -> String {
        format!("post:{}", id)
    }

    pub fn product(id: impl Display) -> String {
        format!("product:{}", id)
    }

    pub fn category(id: impl Display) -> String {
        format!("category:{}", id)
    }

    /// Key for one page of the post listing under a given set of filters
    pub fn posts_list(page: u32, size: u32, kwargs: &[(&str, String)]) -> String {
        Self::build("posts:list", &[page, size], kwargs)
    }

    /// Pattern matching every cached post listing
    pub fn posts_list_pattern() -> &'static str {
        "posts:list:*"
    }

    pub fn rate_limit(identifier: &str, endpoint: &str) -> String {
        format!("rate_limit:{}:{}", identifier, endpoint)
    }
}
