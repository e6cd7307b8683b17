//! Session table shared by the transport tasks.
//!
//! A session exists from a successful `CONNECT` until disconnect. Its UDP
//! endpoint is unknown until the first valid datagram bearing its token.

use std::{collections::HashMap, net::SocketAddr};

use arena_shared::control::{is_valid_username, RejectReason};
use rand::Rng;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub player_id: u8,
    pub token: u32,
    pub username: String,
    pub udp_endpoint: Option<SocketAddr>,
}

/// Result of binding a datagram's source to its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointUpdate {
    /// First datagram for this session.
    Established,
    /// Source address changed since the last datagram.
    Moved,
    Unchanged,
}

#[derive(Debug)]
pub struct SessionTable {
    max_players: u8,
    by_token: HashMap<u32, Session>,
}

impl SessionTable {
    pub fn new(max_players: u8) -> Self {
        Self {
            max_players,
            by_token: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Admits a new player: validates the name, picks the lowest free player
    /// id and a fresh non-zero token.
    pub fn open<R: Rng>(&mut self, username: &str, rng: &mut R) -> Result<Session, RejectReason> {
        if !is_valid_username(username) {
            return Err(RejectReason::InvalidUsername);
        }
        if self.by_token.values().any(|s| s.username == username) {
            return Err(RejectReason::AlreadyConnected);
        }
        let player_id = (1..=self.max_players)
            .find(|id| self.by_token.values().all(|s| s.player_id != *id))
            .ok_or(RejectReason::ServerFull)?;

        let token = loop {
            let t: u32 = rng.gen();
            if t != 0 && !self.by_token.contains_key(&t) {
                break t;
            }
        };
        let session = Session {
            player_id,
            token,
            username: username.to_string(),
            udp_endpoint: None,
        };
        self.by_token.insert(token, session.clone());
        Ok(session)
    }

    pub fn close(&mut self, token: u32) -> Option<Session> {
        self.by_token.remove(&token)
    }

    pub fn get(&self, token: u32) -> Option<&Session> {
        self.by_token.get(&token)
    }

    /// Records `from` as the session's endpoint. `None` if the token is unknown.
    pub fn touch(&mut self, token: u32, from: SocketAddr) -> Option<(u8, EndpointUpdate)> {
        let session = self.by_token.get_mut(&token)?;
        let update = match session.udp_endpoint {
            None => EndpointUpdate::Established,
            Some(prev) if prev != from => EndpointUpdate::Moved,
            Some(_) => EndpointUpdate::Unchanged,
        };
        session.udp_endpoint = Some(from);
        Some((session.player_id, update))
    }

    /// Sessions ascending by player id.
    pub fn sessions(&self) -> Vec<&Session> {
        let mut out: Vec<&Session> = self.by_token.values().collect();
        out.sort_unstable_by_key(|s| s.player_id);
        out
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn assigns_lowest_free_id_and_enforces_capacity() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut table = SessionTable::new(4);
        let ids: Vec<u8> = ["a", "b", "c", "d"]
            .iter()
            .map(|n| table.open(n, &mut rng).unwrap().player_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(table.open("e", &mut rng), Err(RejectReason::ServerFull));

        let second = table.sessions()[1].token;
        table.close(second);
        assert_eq!(table.open("e", &mut rng).unwrap().player_id, 2);
    }

    #[test]
    fn tokens_are_unique_and_non_zero() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut table = SessionTable::new(4);
        let tokens: Vec<u32> = ["a", "b", "c", "d"]
            .iter()
            .map(|n| table.open(n, &mut rng).unwrap().token)
            .collect();
        assert!(tokens.iter().all(|t| *t != 0));
        let mut dedup = tokens.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), tokens.len());
    }

    #[test]
    fn rejects_bad_and_duplicate_names() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut table = SessionTable::new(4);
        assert_eq!(table.open("", &mut rng), Err(RejectReason::InvalidUsername));
        table.open("ace", &mut rng).unwrap();
        assert_eq!(table.open("ace", &mut rng), Err(RejectReason::AlreadyConnected));
    }

    #[test]
    fn endpoint_is_established_on_first_touch() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut table = SessionTable::new(4);
        let s = table.open("ace", &mut rng).unwrap();
        let a: SocketAddr = "127.0.0.1:6000".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:6001".parse().unwrap();

        assert_eq!(table.get(s.token).unwrap().udp_endpoint, None);
        assert_eq!(table.touch(s.token, a), Some((1, EndpointUpdate::Established)));
        assert_eq!(table.get(s.token).unwrap().udp_endpoint, Some(a));
        assert_eq!(table.touch(s.token, a), Some((1, EndpointUpdate::Unchanged)));
        assert_eq!(table.touch(s.token, b), Some((1, EndpointUpdate::Moved)));
        assert_eq!(table.get(s.token).unwrap().udp_endpoint, Some(b));
        assert_eq!(table.touch(s.token ^ 1, a), None);
        assert!(table.get(s.token ^ 1).is_none());
    }
}
