pub mod destination;
pub mod mock_vcursor;
pub mod stream;
pub mod vcursor_trait;

pub use destination::*;
pub use mock_vcursor::*;
pub use stream::*;
pub use vcursor_trait::*;
