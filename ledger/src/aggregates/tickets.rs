//! Ticket registry: ownership records and the resale order book of one event.
//!
//! Tickets are minted only by the bound sale ledger. Each ticket keeps the
//! price it was first sold at; that price bounds every later resale through
//! the configured ceiling multiplier. At most one listing exists per ticket.
//!
//! The owner index is maintained incrementally on every mint and transfer,
//! so `tickets_of` never scans the whole book.

use crate::error::LedgerError;
use crate::types::{Address, Amount, Listing, Ticket, TicketId, TicketMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Validated resale, ready to settle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResaleQuote {
    /// Ticket being sold
    pub ticket_id: TicketId,
    /// Listing seller (current owner)
    pub seller: Address,
    /// Buyer
    pub buyer: Address,
    /// Asking price
    pub price: Amount,
    /// Issuer's share: `floor(price * fee_bps / 10 000)`
    pub fee: Amount,
    /// Seller's share: `price - fee`
    pub proceeds: Amount,
    /// Overpayment to return to the buyer
    pub refund: Amount,
}

/// State of a ticket registry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBookState {
    /// Identity of this ticket registry
    pub address: Address,
    /// The only identity allowed to mint
    pub minter: Address,
    /// Issuer, allowed to write ticket metadata
    pub issuer: Address,
    /// Resale ceiling as a percentage of the original price
    pub resale_ceiling_percent: u32,
    /// Issuer's resale fee in basis points
    pub resale_fee_bps: u16,
    tickets: BTreeMap<TicketId, Ticket>,
    owner_index: HashMap<Address, BTreeSet<TicketId>>,
    listed: BTreeSet<TicketId>,
    next_id: TicketId,
}

impl TicketBookState {
    /// Creates an empty ticket registry
    #[must_use]
    pub fn new(
        address: Address,
        minter: Address,
        issuer: Address,
        resale_ceiling_percent: u32,
        resale_fee_bps: u16,
    ) -> Self {
        Self {
            address,
            minter,
            issuer,
            resale_ceiling_percent,
            resale_fee_bps,
            tickets: BTreeMap::new(),
            owner_index: HashMap::new(),
            listed: BTreeSet::new(),
            next_id: TicketId::FIRST,
        }
    }

    // ========== Reads ==========

    /// Looks up a ticket
    ///
    /// # Errors
    ///
    /// `NoSuchTicket` if the id was never minted.
    pub fn ticket(&self, id: TicketId) -> Result<&Ticket, LedgerError> {
        self.tickets.get(&id).ok_or(LedgerError::NoSuchTicket(id))
    }

    /// Number of tickets ever minted
    #[must_use]
    pub fn total_supply(&self) -> usize {
        self.tickets.len()
    }

    /// Number of tickets held by `owner`
    #[must_use]
    pub fn balance_of(&self, owner: Address) -> usize {
        self.owner_index.get(&owner).map_or(0, BTreeSet::len)
    }

    /// Ids held by `owner`, ascending
    #[must_use]
    pub fn tickets_of(&self, owner: Address) -> Vec<TicketId> {
        self.owner_index
            .get(&owner)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ids with an open listing, ascending
    #[must_use]
    pub fn active_listings(&self) -> Vec<TicketId> {
        self.listed.iter().copied().collect()
    }

    /// Returns true if `id` has an open listing
    #[must_use]
    pub fn is_listed(&self, id: TicketId) -> bool {
        self.listed.contains(&id)
    }

    /// Highest asking price allowed for `id`
    ///
    /// # Errors
    ///
    /// `NoSuchTicket` if never minted, `ArithmeticOverflow` if the ceiling
    /// does not fit in an amount.
    pub fn max_resale_price(&self, id: TicketId) -> Result<Amount, LedgerError> {
        let ticket = self.ticket(id)?;
        ticket
            .original_price
            .percent(self.resale_ceiling_percent)
            .ok_or(LedgerError::ArithmeticOverflow)
    }

    // ========== Mutations ==========

    /// Mints the next ticket to `owner`
    ///
    /// Only the primary purchase path of the owning event ledger calls this,
    /// with the bound sale ledger's identity.
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless `caller` is the bound sale ledger,
    /// `ArithmeticOverflow` if ids are exhausted.
    pub(crate) fn mint(&mut self, caller: Address, owner: Address, original_price: Amount) -> Result<TicketId, LedgerError> {
        if caller != self.minter {
            return Err(LedgerError::Unauthorized);
        }

        let id = self.next_id;
        let next_id = id.next().ok_or(LedgerError::ArithmeticOverflow)?;

        self.tickets.insert(
            id,
            Ticket {
                id,
                owner,
                original_price,
                metadata: TicketMetadata::default(),
                listing: None,
            },
        );
        self.owner_index.entry(owner).or_default().insert(id);
        self.next_id = next_id;

        Ok(id)
    }

    /// Opens or replaces the listing of a ticket
    ///
    /// # Errors
    ///
    /// `NoSuchTicket`, `NotOwner`, `InvalidPrice` for a zero price,
    /// `ResalePriceTooHigh` above the ceiling.
    pub fn list_for_sale(
        &mut self,
        caller: Address,
        id: TicketId,
        asking_price: Amount,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let ceiling = self.max_resale_price(id)?;
        let ticket = self.tickets.get_mut(&id).ok_or(LedgerError::NoSuchTicket(id))?;

        if ticket.owner != caller {
            return Err(LedgerError::NotOwner);
        }
        if asking_price.is_zero() {
            return Err(LedgerError::InvalidPrice);
        }
        if asking_price > ceiling {
            return Err(LedgerError::ResalePriceTooHigh {
                asking: asking_price,
                ceiling,
            });
        }

        ticket.listing = Some(Listing {
            seller: caller,
            asking_price,
            listed_at: now,
        });
        self.listed.insert(id);
        Ok(())
    }

    /// Removes the listing of a ticket
    ///
    /// # Errors
    ///
    /// `NotListed` if there is no listing, `NotSeller` if `caller` did not
    /// create it.
    pub fn cancel_listing(&mut self, caller: Address, id: TicketId) -> Result<(), LedgerError> {
        let ticket = self.tickets.get_mut(&id).ok_or(LedgerError::NotListed)?;
        let listing = ticket.listing.as_ref().ok_or(LedgerError::NotListed)?;

        if listing.seller != caller {
            return Err(LedgerError::NotSeller);
        }

        ticket.listing = None;
        self.listed.remove(&id);
        Ok(())
    }

    /// Validates a resale and computes the split without changing anything
    ///
    /// A listing whose seller no longer owns the ticket counts as not listed.
    ///
    /// # Errors
    ///
    /// `NotListed`, `SelfPurchase` if the buyer is the seller,
    /// `InsufficientPayment` below the asking price.
    pub fn quote_resale(&self, buyer: Address, id: TicketId, payment: Amount) -> Result<ResaleQuote, LedgerError> {
        let ticket = self.tickets.get(&id).ok_or(LedgerError::NotListed)?;
        let listing = ticket
            .listing
            .as_ref()
            .filter(|listing| listing.seller == ticket.owner)
            .ok_or(LedgerError::NotListed)?;

        if buyer == listing.seller {
            return Err(LedgerError::SelfPurchase);
        }

        let price = listing.asking_price;
        let refund = payment
            .checked_sub(price)
            .ok_or(LedgerError::InsufficientPayment {
                required: price,
                supplied: payment,
            })?;
        let fee = price
            .basis_points(self.resale_fee_bps)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let proceeds = price.checked_sub(fee).ok_or(LedgerError::ArithmeticOverflow)?;

        Ok(ResaleQuote {
            ticket_id: id,
            seller: listing.seller,
            buyer,
            price,
            fee,
            proceeds,
            refund,
        })
    }

    /// Transfers ownership and closes the listing for a quoted resale
    ///
    /// # Errors
    ///
    /// `NotListed` if the quote does not match an open listing of this book.
    /// Nothing is changed in that case.
    pub fn settle_resale(&mut self, quote: &ResaleQuote) -> Result<(), LedgerError> {
        let ticket = self
            .tickets
            .get_mut(&quote.ticket_id)
            .filter(|ticket| {
                ticket.owner == quote.seller
                    && ticket.listing.as_ref().is_some_and(|listing| listing.seller == quote.seller)
            })
            .ok_or(LedgerError::NotListed)?;

        ticket.owner = quote.buyer;
        ticket.listing = None;
        self.listed.remove(&quote.ticket_id);

        if let Some(ids) = self.owner_index.get_mut(&quote.seller) {
            ids.remove(&quote.ticket_id);
            if ids.is_empty() {
                self.owner_index.remove(&quote.seller);
            }
        }
        self.owner_index
            .entry(quote.buyer)
            .or_default()
            .insert(quote.ticket_id);
        Ok(())
    }

    /// Overwrites the metadata of a ticket
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless `caller` is the issuer, `NoSuchTicket`.
    pub fn set_metadata(&mut self, caller: Address, id: TicketId, metadata: TicketMetadata) -> Result<(), LedgerError> {
        if caller != self.issuer {
            return Err(LedgerError::Unauthorized);
        }
        let ticket = self.tickets.get_mut(&id).ok_or(LedgerError::NoSuchTicket(id))?;
        ticket.metadata = metadata;
        Ok(())
    }
}
