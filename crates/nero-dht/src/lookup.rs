//! Iterative lookup state.
//!
//! The lookup keeps a candidate set ordered by XOR distance to the
//! target and hands out batches of alpha unqueried contacts per round.
//! When a round learns nothing closer, one widening round queries every
//! remaining candidate among the k closest; a second round without
//! progress ends the lookup.

use std::collections::HashSet;

use nero_core::NodeId;

use crate::contact::Contact;

/// State machine of one iterative lookup.
pub struct Lookup {
    target: NodeId,
    k: usize,
    alpha: usize,
    candidates: Vec<Contact>,
    queried: HashSet<NodeId>,
    responded: HashSet<NodeId>,
    best_seen: Option<[u8; 20]>,
    rounds_without_progress: u32,
    rounds: u32,
}

impl Lookup {
    /// Creates a lookup seeded with the local closest contacts.
    pub fn new(target: NodeId, seed: Vec<Contact>, k: usize, alpha: usize) -> Self {
        let mut lookup = Self {
            target,
            k,
            alpha,
            candidates: Vec::new(),
            queried: HashSet::new(),
            responded: HashSet::new(),
            best_seen: None,
            rounds_without_progress: 0,
            rounds: 0,
        };
        lookup.merge(seed);
        lookup
    }

    /// Returns the lookup target.
    pub fn target(&self) -> &NodeId {
        &self.target
    }

    /// Number of query rounds issued so far.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    fn merge(&mut self, contacts: Vec<Contact>) {
        for contact in contacts {
            if self.candidates.iter().all(|c| c.id != contact.id) {
                self.candidates.push(contact);
            }
        }
        let target = self.target;
        self.candidates.sort_by(|a, b| {
            a.id.xor_distance(&target).cmp(&b.id.xor_distance(&target))
        });
        // Anything beyond the closest-set width can never be queried.
        self.candidates.truncate(self.k * 3);
    }

    fn best_unqueried_distance(&self) -> Option<[u8; 20]> {
        self.candidates
            .iter()
            .find(|c| !self.queried.contains(&c.id))
            .map(|c| c.id.xor_distance(&self.target))
    }

    /// Starts the next round and returns the contacts to query.
    ///
    /// An empty batch means the lookup has terminated.
    pub fn next_batch(&mut self) -> Vec<Contact> {
        if self.is_complete() {
            return Vec::new();
        }

        match self.best_unqueried_distance() {
            None => return Vec::new(),
            Some(best) => {
                if self.best_seen.map(|seen| best < seen).unwrap_or(true) {
                    self.best_seen = Some(best);
                    self.rounds_without_progress = 0;
                } else {
                    self.rounds_without_progress += 1;
                }
            }
        }

        // One widening round after stalling, then give up.
        let width = match self.rounds_without_progress {
            0 => self.alpha,
            1 => self.k,
            _ => return Vec::new(),
        };

        let batch: Vec<Contact> = self
            .candidates
            .iter()
            .filter(|c| !self.queried.contains(&c.id))
            .take(width)
            .cloned()
            .collect();

        for contact in &batch {
            self.queried.insert(contact.id);
        }
        if !batch.is_empty() {
            self.rounds += 1;
        }
        batch
    }

    /// Feeds a response and the contacts it carried.
    pub fn on_response(&mut self, from: &NodeId, discovered: Vec<Contact>) {
        self.responded.insert(*from);
        self.merge(discovered);
    }

    /// Marks a queried contact as failed.
    pub fn on_failure(&mut self, from: &NodeId) {
        self.candidates.retain(|c| &c.id != from);
    }

    /// True when the k closest known candidates have all responded.
    pub fn is_complete(&self) -> bool {
        let closest: Vec<&Contact> = self.candidates.iter().take(self.k).collect();
        !closest.is_empty() && closest.iter().all(|c| self.responded.contains(&c.id))
    }

    /// Returns up to `n` responded contacts closest to the target.
    pub fn closest_responded(&self, n: usize) -> Vec<Contact> {
        self.candidates
            .iter()
            .filter(|c| self.responded.contains(&c.id))
            .take(n)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_with_first_byte(byte: u8) -> NodeId {
        let mut bytes = [0u8; 20];
        bytes[0] = byte;
        NodeId::new(bytes)
    }

    fn contact(byte: u8) -> Contact {
        Contact::new(id_with_first_byte(byte), format!("node-{byte}:1"))
    }

    #[test]
    fn test_batches_are_alpha_wide_and_closest_first() {
        let target = id_with_first_byte(0x00);
        let seed = vec![contact(0x80), contact(0x10), contact(0x20), contact(0x08)];
        let mut lookup = Lookup::new(target, seed, 20, 3);

        let batch = lookup.next_batch();
        let firsts: Vec<u8> = batch.iter().map(|c| c.id.as_bytes()[0]).collect();
        assert_eq!(firsts, vec![0x08, 0x10, 0x20]);
    }

    #[test]
    fn test_no_requeries() {
        let target = id_with_first_byte(0x00);
        let mut lookup = Lookup::new(target, vec![contact(0x10)], 20, 3);

        assert_eq!(lookup.next_batch().len(), 1);
        lookup.on_response(&id_with_first_byte(0x10), Vec::new());
        assert!(lookup.next_batch().is_empty());
    }

    #[test]
    fn test_discovered_contacts_join_candidates() {
        let target = id_with_first_byte(0x00);
        let mut lookup = Lookup::new(target, vec![contact(0x40)], 20, 3);

        lookup.next_batch();
        lookup.on_response(&id_with_first_byte(0x40), vec![contact(0x04), contact(0x02)]);

        let batch = lookup.next_batch();
        let firsts: Vec<u8> = batch.iter().map(|c| c.id.as_bytes()[0]).collect();
        assert_eq!(firsts, vec![0x02, 0x04]);
    }

    #[test]
    fn test_complete_when_k_closest_responded() {
        let target = id_with_first_byte(0x00);
        let seed = vec![contact(0x10), contact(0x20)];
        let mut lookup = Lookup::new(target, seed, 2, 3);

        lookup.next_batch();
        assert!(!lookup.is_complete());

        lookup.on_response(&id_with_first_byte(0x10), Vec::new());
        lookup.on_response(&id_with_first_byte(0x20), Vec::new());
        assert!(lookup.is_complete());

        let closest = lookup.closest_responded(2);
        assert_eq!(closest.len(), 2);
        assert_eq!(closest[0].id, id_with_first_byte(0x10));
    }

    #[test]
    fn test_failed_contacts_drop_out() {
        let target = id_with_first_byte(0x00);
        let seed = vec![contact(0x10), contact(0x20)];
        let mut lookup = Lookup::new(target, seed, 2, 3);

        lookup.next_batch();
        lookup.on_failure(&id_with_first_byte(0x10));
        lookup.on_response(&id_with_first_byte(0x20), Vec::new());

        assert!(lookup.is_complete());
        let closest = lookup.closest_responded(2);
        assert_eq!(closest.len(), 1);
        assert_eq!(closest[0].id, id_with_first_byte(0x20));
    }

    #[test]
    fn test_terminates_without_progress() {
        let target = id_with_first_byte(0x00);
        let mut lookup = Lookup::new(target, vec![contact(0x10)], 20, 3);

        // The only candidate never answers with anything closer.
        let mut batches = 0;
        while !lookup.next_batch().is_empty() {
            batches += 1;
            assert!(batches < 10, "lookup failed to terminate");
        }
        assert!(batches <= 2);
    }
}
