//! The 8 byte frame header.
//!
//! Wire layout (little-endian):
//! ```text
//! byte 0..4   size     u32  total frame size, including these 8 bytes
//! byte 4..8   packed   u32  counter:22 | method_id:8 | is_reply:1 | success:1
//! ```
//!
//! The packed word is built and read with plain shifts and masks rather
//! than a bitfield union, since Rust gives no portable layout guarantee for
//! that trick.

use byteorder::{ByteOrder, LittleEndian};

/// Total size, on the wire, of a [`Header`].
pub const HEADER_LEN: usize = 8;

const COUNTER_BITS: u32 = 22;
const METHOD_ID_BITS: u32 = 8;
const COUNTER_MASK: u32 = (1 << COUNTER_BITS) - 1;
const METHOD_ID_MASK: u32 = (1 << METHOD_ID_BITS) - 1;

/// Ordinal reserved for the generic (`Any`-typed) dispatch path. Method
/// tables never assign this ordinal to a registered method -- the macro
/// caps real methods at `METHOD_ID_MASK` (255), and this constant sits just
/// past the end of the real id space conceptually, but since `method_id` is
/// only 8 bits we instead steal the highest ordinal for it and refuse to
/// register a user method there.
pub const GENERIC_METHOD_ID: u8 = METHOD_ID_MASK as u8;

/// Maximum number of ordinary (non-generic) methods a single interface may
/// register. Checked at macro-expansion time.
pub const MAX_METHODS: usize = METHOD_ID_MASK as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total frame size, including this header.
    pub size: u32,
    /// Monotonic per-connection request counter. Wraps at 22 bits.
    pub counter: u32,
    /// Ordinal of the method in the local RPC table, or
    /// [`GENERIC_METHOD_ID`] for the generic dispatch path.
    pub method_id: u8,
    /// `false` for a request, `true` for a reply.
    pub is_reply: bool,
    /// Only meaningful on replies: `true` if the payload is the return
    /// value, `false` if it is a UTF-8 error string.
    pub success: bool,
}

impl Header {
    pub fn request(counter: u32, method_id: u8, payload_len: u32) -> Self {
        Header {
            size: HEADER_LEN as u32 + payload_len,
            counter: counter & COUNTER_MASK,
            method_id,
            is_reply: false,
            success: false,
        }
    }

    pub fn reply(counter: u32, method_id: u8, success: bool, payload_len: u32) -> Self {
        Header {
            size: HEADER_LEN as u32 + payload_len,
            counter: counter & COUNTER_MASK,
            method_id,
            is_reply: true,
            success,
        }
    }

    /// Correlation key joining a reply to the request that produced it.
    pub fn key(&self) -> u32 {
        (self.counter << METHOD_ID_BITS) | self.method_id as u32
    }

    pub fn payload_len(&self) -> usize {
        self.size as usize - HEADER_LEN
    }

    pub fn encode(&self, dst: &mut [u8; HEADER_LEN]) {
        LittleEndian::write_u32(&mut dst[0..4], self.size);
        let mut packed: u32 = self.counter & COUNTER_MASK;
        packed |= (self.method_id as u32 & METHOD_ID_MASK) << COUNTER_BITS;
        if self.is_reply {
            packed |= 1 << (COUNTER_BITS + METHOD_ID_BITS);
        }
        if self.success {
            packed |= 1 << (COUNTER_BITS + METHOD_ID_BITS + 1);
        }
        LittleEndian::write_u32(&mut dst[4..8], packed);
    }

    pub fn decode(src: &[u8; HEADER_LEN]) -> Self {
        let size = LittleEndian::read_u32(&src[0..4]);
        let packed = LittleEndian::read_u32(&src[4..8]);
        let counter = packed & COUNTER_MASK;
        let method_id = ((packed >> COUNTER_BITS) & METHOD_ID_MASK) as u8;
        let is_reply = (packed >> (COUNTER_BITS + METHOD_ID_BITS)) & 1 != 0;
        let success = (packed >> (COUNTER_BITS + METHOD_ID_BITS + 1)) & 1 != 0;
        Header {
            size,
            counter,
            method_id,
            is_reply,
            success,
        }
    }
}
