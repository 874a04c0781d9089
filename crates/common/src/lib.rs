//! # Tenure Common Crate
//!
//! Shared building blocks for the tenure staking and policy escrow:
//!
//! ## Modules
//! - `types`: `Address`, `PolicyId` and the `Period` time unit
//! - `clock`: `PeriodClock` trait, wall-clock and manual implementations
//! - `token`: `TokenLedger` trait plus an in-memory reference ledger
//! - `error`: `EscrowError`, the protocol-wide error contract
//! - `config`: staking bounds and reward-curve coefficients
//!
//! ## Clock Architecture
//! ```text
//! ┌──────────────────┐
//! │   PeriodClock    │  <- Abstract trait
//! └────────┬─────────┘
//!          │
//!    ┌─────┴──────┐
//!    │            │
//! ┌──▼────────┐ ┌─▼───────────┐
//! │SystemClock│ │ ManualClock │
//! └───────────┘ └─────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let clock = ManualClock::new(10);
//! let token = InMemoryToken::new(deployer, 2_000_000_000);
//! let period = clock.current_period();
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod token;
pub mod types;

pub use clock::{ManualClock, PeriodClock, SystemPeriodClock};
pub use config::StakingConfig;
pub use error::EscrowError;
pub use token::{InMemoryToken, TokenLedger};
pub use types::{Address, Period, PolicyId};

pub type Result<T> = std::result::Result<T, EscrowError>;
