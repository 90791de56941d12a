//! Business logic services.

pub mod credit;
pub mod emails;
pub mod hold_sweeper;
pub mod holds;
pub mod messages;
pub mod operation;
pub mod profiles;
pub mod submissions;

pub use credit::{CreditBalance, CreditCheck, CreditService, DeductionReceipt, ResetOutcome};
pub use emails::{EmailRequest, EmailService, FoundEmail};
pub use hold_sweeper::HoldSweeper;
pub use holds::HoldManager;
pub use messages::{GeneratedMessage, MessageRequest, MessageService};
pub use operation::{OperationError, OperationOutcome, OperationRequest, PaidOperationRunner};
pub use profiles::{ExtractedProfile, ProfileService};
pub use submissions::{SubmissionClaim, SubmissionGuard};
