mod fields;
mod record;
mod value;

pub use self::fields::Fields;
pub use self::record::{Record, RecordId};
pub use self::value::Value;
pub(crate) use self::value::{bind, decode};
