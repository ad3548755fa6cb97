use byteorder::{BigEndian, ByteOrder};

pub const HEADER_LEN: usize = 16;

pub const ACK: u16 = 0b01;
pub const FIN: u16 = 0b10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub seqno: u32,
    pub ackno: u32,
    pub flags: u16,
    pub window: u16,
    pub data: Vec<u8>,
}

impl Segment {
    pub fn new(seqno: u32, ackno: u32, flags: u16, window: u16, data: Vec<u8>) -> Self {
        Segment {
            seqno,
            ackno,
            flags,
            window,
            data,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.flags & ACK != 0
    }

    pub fn is_fin(&self) -> bool {
        self.flags & FIN != 0
    }

    pub fn len(&self) -> usize {
        HEADER_LEN + self.data.len()
    }

    // a FIN with no data still occupies one sequence slot
    pub fn last_seqno(&self) -> u32 {
        let data_bytes = if self.data.is_empty() && self.is_fin() {
            1
        } else {
            self.data.len() as u32
        };
        self.seqno.wrapping_add(data_bytes).wrapping_sub(1)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.len()];
        BigEndian::write_u32(&mut buf[0..4], self.seqno);
        BigEndian::write_u32(&mut buf[4..8], self.ackno);
        BigEndian::write_u16(&mut buf[8..10], self.len() as u16);
        BigEndian::write_u16(&mut buf[10..12], self.flags);
        BigEndian::write_u16(&mut buf[12..14], self.window);
        BigEndian::write_u16(&mut buf[14..16], 0);
        buf[HEADER_LEN..].copy_from_slice(&self.data);

        let cksum = internet_checksum(&buf);
        BigEndian::write_u16(&mut buf[14..16], cksum);
        buf
    }

    // None only if bytes can't even hold a header; truncation past that is
    // the caller's to count, since it feeds a diagnostic this module doesn't own
    pub fn decode(bytes: &[u8]) -> Option<DecodedSegment> {
        if bytes.len() < HEADER_LEN {
            return None;
        }

        let declared_len = BigEndian::read_u16(&bytes[8..10]) as usize;
        let actual_cksum = BigEndian::read_u16(&bytes[14..16]);

        if declared_len < HEADER_LEN || bytes.len() < declared_len {
            return Some(DecodedSegment::Truncated { declared_len });
        }

        let mut scratch = bytes[..declared_len].to_vec();
        BigEndian::write_u16(&mut scratch[14..16], 0);
        let computed_cksum = internet_checksum(&scratch);

        if computed_cksum != actual_cksum {
            return Some(DecodedSegment::InvalidChecksum);
        }

        let seqno = BigEndian::read_u32(&bytes[0..4]);
        let ackno = BigEndian::read_u32(&bytes[4..8]);
        let flags = BigEndian::read_u16(&bytes[10..12]);
        let window = BigEndian::read_u16(&bytes[12..14]);
        let data = bytes[HEADER_LEN..declared_len].to_vec();

        Some(DecodedSegment::Ok(Segment {
            seqno,
            ackno,
            flags,
            window,
            data,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedSegment {
    Ok(Segment),
    Truncated { declared_len: usize },
    InvalidChecksum,
}

// buf must already have its cksum field zeroed
pub fn internet_checksum(buf: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = buf.chunks_exact(2);
    for chunk in &mut chunks {
        sum += BigEndian::read_u16(chunk) as u32;
    }
    if let [last] = *chunks.remainder() {
        sum += (last as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}
