/// FITS logical record size in bytes; every header and data segment is a whole
/// number of these.
pub const BLOCK_SIZE: usize = 2880;

/// Size of one header card in bytes.
pub const CARD_SIZE: usize = 80;

/// Number of cards in one header block.
pub const CARDS_PER_BLOCK: usize = BLOCK_SIZE / CARD_SIZE;

/// Header blocks are padded with ASCII spaces.
pub const HEADER_PAD_BYTE: u8 = b' ';

/// Data blocks are padded with zeros.
pub const DATA_PAD_BYTE: u8 = 0;

/// Returns the byte length of the smallest whole number of blocks holding
/// `num_bytes` bytes. Zero bytes need zero blocks.
pub const fn padded_byte_len(num_bytes: usize) -> usize {
    num_bytes.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Appends `pad_byte` to `buf` until its length is a multiple of [`BLOCK_SIZE`].
pub fn pad_to_block(buf: &mut Vec<u8>, pad_byte: u8) {
    let target = padded_byte_len(buf.len());
    buf.resize(target, pad_byte);
}
