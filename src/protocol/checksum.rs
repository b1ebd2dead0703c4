//! CRC16 checksum used by pod frames.
//!
//! The pod computes a CRC-16 (IBM polynomial `0x8005`, MSB first, initial
//! register `0`, no final XOR) over the frame payload followed by the `;`
//! separator and sends it as four uppercase hex digits:
//!
//! ```text
//! !ACK,GET,SER_NUMBER,AB12CD34EF56;B26B
//! └──────── payload ─────────────┘ └crc┘
//! ```

/// Separator between payload and checksum. It is part of the checksummed data.
pub const CHECKSUM_TERMINATOR: u8 = b';';

/// CRC polynomial (IBM / ANSI, MSB-first form).
pub const POLYNOMIAL: u16 = 0x8005;

/// Folds one byte into the CRC register, MSB first.
#[must_use]
pub const fn crc16_update(crc: u16, byte: u8) -> u16 {
    let mut crc = crc;
    let mut data = (byte as u16) << 8;
    let mut bit = 0;
    while bit < 8 {
        if (data ^ crc) & 0x8000 == 0 {
            crc <<= 1;
        } else {
            crc = (crc << 1) ^ POLYNOMIAL;
        }
        data <<= 1;
        bit += 1;
    }
    crc
}

/// Raw CRC over `data`, starting from a zero register.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0, |crc, &b| crc16_update(crc, b))
}

/// Computes the frame checksum for `payload` as 4 uppercase hex digits.
#[must_use]
pub fn checksum(payload: &[u8]) -> String {
    let crc = crc16_update(crc16(payload), CHECKSUM_TERMINATOR);
    format!("{crc:04X}")
}

/// Returns true if `expected` is exactly the checksum of `payload`.
#[must_use]
pub fn verify(payload: &[u8], expected: &str) -> bool {
    checksum(payload) == expected
}
