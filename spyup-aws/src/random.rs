use std::{fmt, net::Ipv4Addr, str::FromStr};

use rand::Rng;

use crate::errors::{self, Result};

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";

/// Inclusive range of the second octet of generated base addresses.
pub const MIN_BLOCK: u8 = 15;
pub const MAX_BLOCK: u8 = 99;

/// Generates a run label of the form "ab1cd".
pub fn generate_label() -> String {
    label_from(&mut rand::rng())
}

/// Generates a run label using the given source of randomness.
pub fn label_from<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut s = String::with_capacity(5);
    for class in [LOWERCASE, LOWERCASE, DIGITS, LOWERCASE, LOWERCASE] {
        s.push(class[rng.random_range(0..class.len())] as char);
    }
    s
}

/// Generates a random "10.N.0.0" base address with N in [15, 99].
pub fn generate_base_address() -> BaseAddress {
    base_address_from(&mut rand::rng())
}

pub fn base_address_from<R: Rng + ?Sized>(rng: &mut R) -> BaseAddress {
    let block = rng.random_range(MIN_BLOCK..=MAX_BLOCK);
    BaseAddress(Ipv4Addr::new(10, block, 0, 0))
}

/// Picks a host octet for a network interface in [100, 250].
pub fn host_octet_from<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    rng.random_range(100..=250)
}

/// Private address template whose last octet is filled in by callers.
/// Displays with a zero last octet.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BaseAddress(Ipv4Addr);

impl BaseAddress {
    /// Returns the second octet.
    pub fn block(&self) -> u8 {
        self.0.octets()[1]
    }

    /// Returns the address with the last octet replaced.
    pub fn host(&self, octet: u8) -> Ipv4Addr {
        let [a, b, c, _] = self.0.octets();
        Ipv4Addr::new(a, b, c, octet)
    }

    /// VPC CIDR block ("/16").
    pub fn vpc_cidr(&self) -> String {
        format!("{}/16", self.host(0))
    }

    /// Subnet CIDR block ("/24").
    pub fn subnet_cidr(&self) -> String {
        format!("{}/24", self.host(0))
    }
}

impl fmt::Display for BaseAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host(0))
    }
}

impl FromStr for BaseAddress {
    type Err = errors::Error;

    fn from_str(s: &str) -> Result<Self> {
        let ip = Ipv4Addr::from_str(s.trim())
            .map_err(|e| errors::config(format!("invalid base_ip '{}' ({})", s, e)))?;
        if ip.octets()[3] != 0 {
            return Err(errors::config(format!(
                "invalid base_ip '{}' (last octet must be 0)",
                s
            )));
        }
        Ok(Self(ip))
    }
}

/// RUST_LOG=debug cargo test --package spyup-aws --lib -- random::test_label --exact --show-output
#[test]
fn test_label() {
    let _ = env_logger::builder().is_test(true).try_init();

    for _ in 0..1000 {
        let label = generate_label();
        let b = label.as_bytes();
        assert_eq!(b.len(), 5, "unexpected label {}", label);
        assert!(b[0].is_ascii_lowercase());
        assert!(b[1].is_ascii_lowercase());
        assert!(b[2].is_ascii_digit());
        assert!(b[3].is_ascii_lowercase());
        assert!(b[4].is_ascii_lowercase());
    }
    log::info!("sample label {}", generate_label());
}

/// RUST_LOG=debug cargo test --package spyup-aws --lib -- random::test_base_address --exact --show-output
#[test]
fn test_base_address() {
    let _ = env_logger::builder().is_test(true).try_init();

    for _ in 0..1000 {
        let base = generate_base_address();
        assert!((MIN_BLOCK..=MAX_BLOCK).contains(&base.block()));

        let s = base.to_string();
        assert_eq!(s, format!("10.{}.0.0", base.block()));
        assert_eq!(base.vpc_cidr(), format!("10.{}.0.0/16", base.block()));
        assert_eq!(base.subnet_cidr(), format!("10.{}.0.0/24", base.block()));

        let parsed = BaseAddress::from_str(&s).unwrap();
        assert_eq!(parsed, base);
    }

    let mut rng = rand::rng();
    for _ in 0..1000 {
        let octet = host_octet_from(&mut rng);
        assert!((100..=250).contains(&octet));
    }
}

#[test]
fn test_base_address_parse() {
    let base = BaseAddress::from_str("10.42.0.0").unwrap();
    assert_eq!(base.block(), 42);
    assert_eq!(base.host(111), Ipv4Addr::new(10, 42, 0, 111));
    assert_eq!(base.vpc_cidr(), "10.42.0.0/16");

    assert!(BaseAddress::from_str("10.42.0.7").unwrap_err().is_config());
    assert!(BaseAddress::from_str("10.42.0").unwrap_err().is_config());
    assert!(BaseAddress::from_str("").unwrap_err().is_config());
}

#[test]
fn test_seeded() {
    use rand::{rngs::StdRng, SeedableRng};

    let mut a = StdRng::seed_from_u64(7);
    let mut b = StdRng::seed_from_u64(7);
    assert_eq!(label_from(&mut a), label_from(&mut b));
    assert_eq!(base_address_from(&mut a), base_address_from(&mut b));
    assert_eq!(host_octet_from(&mut a), host_octet_from(&mut b));
}
