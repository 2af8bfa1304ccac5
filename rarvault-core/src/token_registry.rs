//! HTTP token registry for the virtual-HTTP strategy (spec.md §4.7 "Token
//! lifecycle").
//!
//! Generalizes the teacher's connection registry
//! (`ferrex-server::infra::websocket::ConnectionManager`) from connection IDs
//! to opaque playback tokens: concurrent readers (every range-server
//! request), rare writers (queue worker insert, shutdown purge).

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::types::{ArchiveSetHandle, Token};

/// What a token resolves to: which archive set, which entry inside it, and
/// the entry's size (advertised by `HEAD` without re-reading the archive).
#[derive(Debug, Clone)]
pub struct TokenRegistration {
    pub handle: ArchiveSetHandle,
    pub entry_path: String,
    pub size: u64,
}

#[derive(Clone)]
pub struct TokenRegistry {
    tokens: Arc<DashMap<Token, TokenRegistration>>,
}

impl fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRegistry")
            .field("active_tokens", &self.tokens.len())
            .finish()
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self {
            tokens: Arc::new(DashMap::new()),
        }
    }

    /// Generate and register a fresh token. Tokens are held for process
    /// lifetime by default; disposal never revokes one (spec.md §4.7).
    pub fn register(&self, handle: ArchiveSetHandle, entry_path: String, size: u64) -> Token {
        let token = Token::generate();
        self.tokens
            .insert(token, TokenRegistration { handle, entry_path, size });
        token
    }

    pub fn resolve(&self, token: &Token) -> Option<TokenRegistration> {
        self.tokens.get(token).map(|r| r.clone())
    }

    /// Explicit shutdown purge (spec.md §9 "only an explicit shutdown purges").
    pub fn clear(&self) {
        self.tokens.clear();
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn registered_token_resolves_to_the_same_entry() {
        let registry = TokenRegistry::new();
        let handle = ArchiveSetHandle::new(PathBuf::from("/src/a.rar"));
        let token = registry.register(handle.clone(), "movie.mkv".into(), 1024);

        let resolved = registry.resolve(&token).unwrap();
        assert_eq!(resolved.handle, handle);
        assert_eq!(resolved.entry_path, "movie.mkv");
        assert_eq!(resolved.size, 1024);
    }

    #[test]
    fn unknown_token_does_not_resolve() {
        let registry = TokenRegistry::new();
        assert!(registry.resolve(&Token::generate()).is_none());
    }

    #[test]
    fn clear_purges_every_registration() {
        let registry = TokenRegistry::new();
        registry.register(ArchiveSetHandle::new(PathBuf::from("/a.rar")), "a.mkv".into(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }
}
