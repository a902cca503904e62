use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Issues and validates `get_peers`/`announce_peer` tokens bound to the
/// requester's IP. Tokens are an HMAC-SHA1 of the IP's string form under a
/// rotating 32-bit secret; both the current and the immediately previous
/// secret are accepted, so a token issued just before a rotation still
/// validates for one more rotation window.
pub struct TokenBuilder {
    current_key: u32,
    previous_key: u32,
    last_rotation: DateTime<Utc>,
}

impl TokenBuilder {
    pub fn new() -> TokenBuilder {
        TokenBuilder {
            current_key: rand::thread_rng().next_u32(),
            previous_key: rand::thread_rng().next_u32(),
            last_rotation: Utc::now(),
        }
    }

    pub fn create(&self, ip: IpAddr) -> Vec<u8> {
        hmac_with_key(self.current_key, ip)
    }

    pub fn validate(&self, token: &[u8], ip: IpAddr) -> bool {
        verify(self.current_key, ip, token) || verify(self.previous_key, ip, token)
    }

    /// Rotates the secret if `token_time_limit` has elapsed since the last
    /// rotation. Called once per main-loop tick.
    pub fn maybe_rotate(&mut self, token_time_limit: Duration) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.last_rotation);
        if elapsed.to_std().unwrap_or(Duration::ZERO) < token_time_limit {
            return false;
        }
        self.previous_key = self.current_key;
        self.current_key = rand::thread_rng().next_u32();
        self.last_rotation = Utc::now();
        true
    }
}

impl Default for TokenBuilder {
    fn default() -> TokenBuilder {
        TokenBuilder::new()
    }
}

fn hmac_with_key(key: u32, ip: IpAddr) -> Vec<u8> {
    let mut mac = HmacSha1::new_from_slice(&key.to_be_bytes()).expect("HMAC accepts any key length");
    mac.update(ip.to_string().as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn verify(key: u32, ip: IpAddr, token: &[u8]) -> bool {
    let mut mac = HmacSha1::new_from_slice(&key.to_be_bytes()).expect("HMAC accepts any key length");
    mac.update(ip.to_string().as_bytes());
    mac.verify_slice(token).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::thread::sleep;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn token_validates_only_for_the_issuing_ip() {
        let builder = TokenBuilder::new();
        let token = builder.create(ip(1, 2, 3, 4));
        assert!(builder.validate(&token, ip(1, 2, 3, 4)));
        assert!(!builder.validate(&token, ip(1, 2, 3, 5)));
    }

    #[test]
    fn token_survives_exactly_one_rotation() {
        let mut builder = TokenBuilder::new();
        let token = builder.create(ip(9, 9, 9, 9));

        assert!(builder.maybe_rotate(Duration::ZERO));
        assert!(builder.validate(&token, ip(9, 9, 9, 9)));

        assert!(builder.maybe_rotate(Duration::ZERO));
        assert!(!builder.validate(&token, ip(9, 9, 9, 9)));
    }

    #[test]
    fn rotation_is_a_no_op_before_the_limit_elapses() {
        let mut builder = TokenBuilder::new();
        assert!(!builder.maybe_rotate(Duration::from_secs(3600)));
        sleep(Duration::from_millis(1));
        assert!(!builder.maybe_rotate(Duration::from_secs(3600)));
    }
}
