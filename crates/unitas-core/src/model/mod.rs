pub mod handle;
pub mod record;
pub mod value;

pub use handle::EntityHandle;
pub use record::{PersistentCollection, Record};
pub use value::{EntityType, IdentityKey, KeyPart, PrimaryKey, Row, Value};
