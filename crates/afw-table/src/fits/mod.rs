//! Wire layer: FITS blocks, header cards, binary-table column codes and the
//! HDU container.

pub mod bintable;
pub mod block;
pub mod file;
pub mod header;
pub mod value;

pub use block::{BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE};
pub use file::{FitsFile, Hdu, WriteMode};
pub use header::Card;
pub use value::Value;
