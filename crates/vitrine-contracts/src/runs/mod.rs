pub mod diagnostics;
pub mod receipts;
pub mod request;
