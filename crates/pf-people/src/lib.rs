//! People graph: identity-unified ingestion of engagement events and the
//! lens computer deriving warmth and activity insights per person.

pub mod ingestion;
pub mod lens;

pub use ingestion::{IngestOutcome, IngestRequest, PeopleError, PeopleService};
pub use lens::LensComputer;
