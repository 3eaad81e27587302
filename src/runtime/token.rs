//! Readiness token layout and connection identities.
//!
//! Connection tokens are registry slot indices. The top of the token space
//! is reserved for the listener and the cross-thread waker.

use mio::Token;

/// Token for the listening socket.
pub const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Token for the waker used by worker completions and shutdown.
pub const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Identity of one connection lifecycle.
///
/// The slot alone is not enough: slots are recycled, so a completion that
/// arrives after its connection closed could otherwise land on the next
/// occupant. The generation is unique per accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
    pub slot: usize,
    pub generation: u64,
}

impl ConnId {
    pub fn token(self) -> Token {
        Token(self.slot)
    }
}

/// Hands out generation numbers.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    next: u64,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next(&mut self) -> u64 {
        let generation = self.next;
        self.next = self.next.wrapping_add(1);
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generations_are_unique() {
        let mut counter = GenerationCounter::new();
        let a = counter.next();
        let b = counter.next();
        assert_ne!(a, b);
        assert_ne!(a, 0);
    }

    #[test]
    fn test_reserved_tokens() {
        assert_ne!(LISTENER_TOKEN, WAKER_TOKEN);
        let id = ConnId {
            slot: 3,
            generation: 9,
        };
        assert_eq!(id.token(), Token(3));
    }
}
