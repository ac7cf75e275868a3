//! Domain types for the ticket resale ledger.
//!
//! Value objects shared by the registry, the sale ledger and the ticket
//! registry: identities, money, sale configuration and the records kept per
//! ticket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Basis-point denominator: 10 000 bps = 100 %
pub const BPS_DENOMINATOR: u16 = 10_000;

/// Hard cap on the issuer's resale fee: 3 000 bps = 30 %
pub const FEE_HARD_CAP_BPS: u16 = 3_000;

/// Smallest allowed resale ceiling multiplier (resale at face value)
pub const MIN_RESALE_CEILING_PERCENT: u32 = 100;

// ============================================================================
// Identities
// ============================================================================

/// Opaque 20-byte account identity
///
/// Parsed from `0x`-prefixed hex at the boundary (case-insensitive) and
/// compared byte-for-byte afterwards. Always displayed as lower-case hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// The all-zero address
    pub const ZERO: Self = Self([0; 20]);

    /// Creates an address from raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Creates an address with every byte set to `byte`
    #[must_use]
    pub const fn repeat_byte(byte: u8) -> Self {
        Self([byte; 20])
    }

    /// Raw bytes of the address
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Deterministic identity for a ledger component
    ///
    /// The first byte carries `tag`, the last eight bytes carry `index`
    /// big-endian, everything else is zero.
    #[must_use]
    pub fn derive(tag: u8, index: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[0] = tag;
        bytes[12..].copy_from_slice(&index.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("0x")?;
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

/// Error returned when parsing an [`Address`] from text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressParseError {
    /// Input does not start with `0x`
    #[error("address must start with 0x")]
    MissingPrefix,
    /// Wrong number of hex digits after the prefix
    #[error("address must have 40 hex digits, found {0}")]
    InvalidLength(usize),
    /// A character is not a hex digit
    #[error("address contains a non-hex character")]
    InvalidHex,
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(AddressParseError::MissingPrefix)?;

        if digits.len() != 40 {
            return Err(AddressParseError::InvalidLength(digits.len()));
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AddressParseError::InvalidHex);
        }

        let mut bytes = [0u8; 20];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = digits
                .get(i * 2..i * 2 + 2)
                .ok_or(AddressParseError::InvalidHex)?;
            *byte = u8::from_str_radix(pair, 16).map_err(|_| AddressParseError::InvalidHex)?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Sequential ticket identifier, starting at 1 and never reused
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(u64);

impl TicketId {
    /// The first id minted by a ticket registry
    pub const FIRST: Self = Self(1);

    /// Creates a `TicketId` from its numeric value
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Numeric value of the id
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// The id following this one, if it exists
    #[must_use]
    pub const fn next(&self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a sale in the registry directory
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaleId(u64);

impl SaleId {
    /// Creates a `SaleId` from a directory index
    #[must_use]
    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    /// Directory index of the sale
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SaleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money
// ============================================================================

/// Amount of money in the smallest currency unit
///
/// Only checked arithmetic is offered; callers turn `None` into
/// `LedgerError::ArithmeticOverflow`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u128);

impl Amount {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates an amount in the smallest unit
    #[must_use]
    pub const fn new(units: u128) -> Self {
        Self(units)
    }

    /// The amount in the smallest unit
    #[must_use]
    pub const fn get(&self) -> u128 {
        self.0
    }

    /// Returns true for zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(sum) => Some(Self(sum)),
            None => None,
        }
    }

    /// Checked subtraction
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(diff) => Some(Self(diff)),
            None => None,
        }
    }

    /// `floor(self * numerator / denominator)`, `None` on overflow or a zero denominator
    #[must_use]
    pub const fn mul_div(self, numerator: u128, denominator: u128) -> Option<Self> {
        match self.0.checked_mul(numerator) {
            Some(product) => match product.checked_div(denominator) {
                Some(quotient) => Some(Self(quotient)),
                None => None,
            },
            None => None,
        }
    }

    /// `floor(self * percent / 100)`
    #[must_use]
    pub const fn percent(self, percent: u32) -> Option<Self> {
        self.mul_div(percent as u128, 100)
    }

    /// `floor(self * bps / 10 000)`
    #[must_use]
    pub const fn basis_points(self, bps: u16) -> Option<Self> {
        self.mul_div(bps as u128, BPS_DENOMINATOR as u128)
    }
}

impl From<u128> for Amount {
    fn from(units: u128) -> Self {
        Self(units)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Sale configuration and lifecycle
// ============================================================================

/// Immutable parameters of a ticket sale
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleConfig {
    /// Collection name shown to buyers
    pub name: String,
    /// Short collection symbol
    pub symbol: String,
    /// Primary-market price per ticket
    pub unit_price: Amount,
    /// Number of tickets that can ever be sold on the primary market
    pub capacity: u32,
    /// Resale ceiling as a percentage of the original price (>= 100)
    pub resale_ceiling_percent: u32,
    /// Issuer's share of every resale, in basis points
    pub resale_fee_bps: u16,
}

/// Stored lifecycle phase of a sale
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Primary sales open
    #[default]
    Active,
    /// Primary sales closed by the issuer
    Closed,
}

/// Observable status of a sale; `SoldOut` is derived from the counters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SaleStatus {
    /// Tickets available
    Active,
    /// Every ticket sold and the sale not closed
    SoldOut,
    /// Closed by the issuer
    Closed,
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::SoldOut => write!(f, "sold out"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Descriptive event details, overwritten wholesale by the issuer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetails {
    /// Event date as presented to buyers
    pub date: String,
    /// Venue or location
    pub location: String,
    /// Free-form description
    pub description: String,
}

/// Revenue accumulated by a sale and not yet withdrawn
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revenue {
    /// From primary purchases
    pub primary: Amount,
    /// From issuer fees on resales
    pub secondary: Amount,
}

impl Revenue {
    /// `primary + secondary`
    #[must_use]
    pub const fn total(&self) -> Option<Amount> {
        self.primary.checked_add(self.secondary)
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// Per-ticket metadata, writable by the issuer only
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketMetadata {
    /// Seat description
    pub seat_info: String,
    /// Ticket class (e.g. "VIP")
    pub ticket_type: String,
    /// Event date printed on the ticket
    pub event_date: String,
}

/// An open resale order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Owner at listing time
    pub seller: Address,
    /// Price the buyer must pay
    pub asking_price: Amount,
    /// When the listing was created or last replaced
    pub listed_at: DateTime<Utc>,
}

/// A minted ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket id
    pub id: TicketId,
    /// Current owner
    pub owner: Address,
    /// Primary sale price, fixed at mint
    pub original_price: Amount,
    /// Issuer-provided metadata
    pub metadata: TicketMetadata,
    /// Open resale order, if any
    pub listing: Option<Listing>,
}

impl Ticket {
    /// Returns true if the ticket has an open resale order
    #[must_use]
    pub const fn is_for_sale(&self) -> bool {
        self.listing.is_some()
    }
}

// ============================================================================
// Directory and receipts
// ============================================================================

/// Registry directory entry for one created sale
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleEntry {
    /// Directory index
    pub sale_id: SaleId,
    /// Issuer that created the sale
    pub issuer: Address,
    /// Identity of the sale ledger component
    pub sale_address: Address,
    /// Identity of the ticket registry component
    pub tickets_address: Address,
    /// Configuration the sale was created with
    pub config: SaleConfig,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Result of a primary purchase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryPurchase {
    /// Newly minted ticket
    pub ticket_id: TicketId,
    /// Price charged
    pub price: Amount,
    /// Overpayment returned to the buyer
    pub refund: Amount,
}

/// Result of a resale
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResaleReceipt {
    /// Ticket that changed hands
    pub ticket_id: TicketId,
    /// Previous owner
    pub seller: Address,
    /// New owner
    pub buyer: Address,
    /// Asking price charged
    pub price: Amount,
    /// Issuer's share
    pub fee: Amount,
    /// Seller's share (`price - fee`)
    pub proceeds: Amount,
    /// Overpayment returned to the buyer
    pub refund: Amount,
}
