//! Seat reservations: signed single-use tokens and the per-room seat book

use std::collections::{HashMap, HashSet};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::util::time::unix_secs;
use crate::ws::protocol::Identity;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried inside a reservation token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatClaims {
    pub room_id: Uuid,
    pub identity: Identity,
    pub seat_id: Uuid,
    /// Expiration time (Unix seconds)
    pub exp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReservationError {
    #[error("Identity is not allowed in this room")]
    NotAllowed,

    #[error("Room is full")]
    RoomFull,

    #[error("Room is no longer accepting players")]
    RoomUnavailable,

    #[error("Invalid reservation token")]
    InvalidToken,

    #[error("Reservation expired")]
    Expired,

    #[error("Reservation already used")]
    AlreadyRedeemed,

    #[error("Unknown seat")]
    UnknownSeat,
}

/// Signs and verifies reservation tokens: `base64url(claims).base64url(hmac)`
pub struct ReservationSigner {
    key: Vec<u8>,
}

impl ReservationSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, ReservationError> {
        HmacSha256::new_from_slice(&self.key).map_err(|_| ReservationError::InvalidToken)
    }

    pub fn sign(&self, claims: &SeatClaims) -> Result<String, ReservationError> {
        let payload = serde_json::to_vec(claims).map_err(|_| ReservationError::InvalidToken)?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);

        let mut mac = self.mac()?;
        mac.update(payload_b64.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{payload_b64}.{signature}"))
    }

    /// Verify signature and expiry, returning the claims
    pub fn verify(&self, token: &str) -> Result<SeatClaims, ReservationError> {
        self.verify_at(token, unix_secs())
    }

    pub fn verify_at(&self, token: &str, now: u64) -> Result<SeatClaims, ReservationError> {
        let (payload_b64, signature_b64) =
            token.split_once('.').ok_or(ReservationError::InvalidToken)?;

        let provided = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| ReservationError::InvalidToken)?;
        let mut mac = self.mac()?;
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| ReservationError::InvalidToken)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| ReservationError::InvalidToken)?;
        let claims: SeatClaims =
            serde_json::from_slice(&payload).map_err(|_| ReservationError::InvalidToken)?;

        if claims.exp < now {
            return Err(ReservationError::Expired);
        }
        Ok(claims)
    }
}

#[derive(Debug, Clone)]
struct Seat {
    identity: Identity,
    redeemed: bool,
}

/// Seats handed out for one room. Guarded by the room handle's mutex so a
/// whole squad is reserved in one critical section.
#[derive(Debug)]
pub struct SeatBook {
    allow_list: Option<HashSet<Identity>>,
    capacity: usize,
    seats: HashMap<Uuid, Seat>,
    closed: bool,
}

impl SeatBook {
    pub fn new(allow_list: Option<HashSet<Identity>>, capacity: usize) -> Self {
        Self {
            allow_list,
            capacity,
            seats: HashMap::new(),
            closed: false,
        }
    }

    /// Stop issuing seats (room finished or shutting down)
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Distinct identities holding a seat
    fn holders(&self) -> HashSet<&Identity> {
        self.seats.values().map(|s| &s.identity).collect()
    }

    /// Reserve a seat for `identity`. An identity that already holds an
    /// unredeemed seat gets a fresh seat id and the old one is dropped.
    pub fn reserve(&mut self, identity: &Identity) -> Result<Uuid, ReservationError> {
        if self.closed {
            return Err(ReservationError::RoomUnavailable);
        }
        if let Some(allowed) = &self.allow_list {
            if !allowed.contains(identity) {
                return Err(ReservationError::NotAllowed);
            }
        }

        let already_holder = self.holders().contains(identity);
        if !already_holder && self.holders().len() >= self.capacity {
            return Err(ReservationError::RoomFull);
        }

        self.seats
            .retain(|_, seat| seat.redeemed || &seat.identity != identity);
        let seat_id = Uuid::new_v4();
        self.seats.insert(
            seat_id,
            Seat {
                identity: identity.clone(),
                redeemed: false,
            },
        );
        Ok(seat_id)
    }

    /// Reserve for every identity in order; results line up with the input
    pub fn reserve_all(&mut self, identities: &[Identity]) -> Vec<Result<Uuid, ReservationError>> {
        identities.iter().map(|id| self.reserve(id)).collect()
    }

    /// Consume a seat. Each seat id can be redeemed once, by its holder.
    pub fn redeem(&mut self, seat_id: Uuid, identity: &Identity) -> Result<(), ReservationError> {
        if self.closed {
            return Err(ReservationError::RoomUnavailable);
        }
        let seat = self
            .seats
            .get_mut(&seat_id)
            .ok_or(ReservationError::UnknownSeat)?;
        if &seat.identity != identity {
            return Err(ReservationError::InvalidToken);
        }
        if seat.redeemed {
            return Err(ReservationError::AlreadyRedeemed);
        }
        seat.redeemed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(exp: u64) -> SeatClaims {
        SeatClaims {
            room_id: Uuid::new_v4(),
            identity: Identity::new("0xabc"),
            seat_id: Uuid::new_v4(),
            exp,
        }
    }

    #[test]
    fn token_round_trip_and_tamper() {
        let signer = ReservationSigner::new("secret");
        let c = claims(1_000);
        let token = signer.sign(&c).unwrap();
        assert_eq!(signer.verify_at(&token, 999).unwrap(), c);

        let other = ReservationSigner::new("other");
        assert_eq!(other.verify_at(&token, 999), Err(ReservationError::InvalidToken));

        let mut forged = token.clone();
        forged.insert(3, 'x');
        assert_eq!(signer.verify_at(&forged, 999), Err(ReservationError::InvalidToken));
        assert_eq!(signer.verify_at("garbage", 999), Err(ReservationError::InvalidToken));
    }

    #[test]
    fn expired_token_is_refused() {
        let signer = ReservationSigner::new("secret");
        let token = signer.sign(&claims(1_000)).unwrap();
        assert_eq!(signer.verify_at(&token, 1_001), Err(ReservationError::Expired));
    }

    #[test]
    fn seats_are_single_use() {
        let a = Identity::new("a");
        let mut book = SeatBook::new(None, 2);
        let seat = book.reserve(&a).unwrap();
        assert_eq!(book.redeem(seat, &Identity::new("b")), Err(ReservationError::InvalidToken));
        assert!(book.redeem(seat, &a).is_ok());
        assert_eq!(book.redeem(seat, &a), Err(ReservationError::AlreadyRedeemed));
        assert_eq!(book.redeem(Uuid::new_v4(), &a), Err(ReservationError::UnknownSeat));
    }

    #[test]
    fn allow_list_and_capacity_are_enforced() {
        let a = Identity::new("a");
        let b = Identity::new("b");
        let c = Identity::new("c");
        let allowed: HashSet<Identity> = [a.clone(), b.clone()].into_iter().collect();
        let mut book = SeatBook::new(Some(allowed), 1);

        let results = book.reserve_all(&[a.clone(), b.clone(), c.clone()]);
        assert!(results[0].is_ok());
        assert_eq!(results[1], Err(ReservationError::RoomFull));
        assert_eq!(results[2], Err(ReservationError::NotAllowed));

        // re-reserving replaces the unredeemed seat without using capacity
        let first = results[0].clone().unwrap();
        let second = book.reserve(&a).unwrap();
        assert_ne!(first, second);
        assert_eq!(book.redeem(first, &a), Err(ReservationError::UnknownSeat));
        assert!(book.redeem(second, &a).is_ok());
    }

    #[test]
    fn closed_book_refuses_everything() {
        let a = Identity::new("a");
        let mut book = SeatBook::new(None, 3);
        let seat = book.reserve(&a).unwrap();
        book.close();
        assert_eq!(book.reserve(&a), Err(ReservationError::RoomUnavailable));
        assert_eq!(book.redeem(seat, &a), Err(ReservationError::RoomUnavailable));
    }
}
