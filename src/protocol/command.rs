//! Commands sent to the pod.
//!
//! Commands are plain ASCII lines terminated by `\r\n`; unlike responses
//! they carry no checksum.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::LINE_TERMINATOR;
use super::params::Param;

/// A command understood by the pod firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `CAL,0,1` - indicator LED on.
    LedOn,
    /// `CAL,0,0` - indicator LED off.
    LedOff,
    /// `CAL,1,1` - commit pending parameter changes to non-volatile memory.
    SaveParams,
    /// `GET,<index>`.
    Get(Param),
    /// `SET,<index>,<value>`.
    Set(Param, String),
    /// `GET,SER_NUMBER`.
    GetSerialNumber,
    /// `SET,SER_NUMBER,<value>`.
    SetSerialNumber(String),
    /// `RUN_RP,<0|1>` - primary measurement, with or without blank correction.
    RunRp { use_blanks: bool },
    /// `RUN,<args>` - pre-formatted measurement command.
    Run(String),
    /// `FWVERSION`.
    FirmwareVersion,
}

impl Command {
    /// Wire bytes, including the line terminator.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let text = self.to_string();
        let mut buf = BytesMut::with_capacity(text.len() + LINE_TERMINATOR.len());
        buf.put_slice(text.as_bytes());
        buf.put_slice(LINE_TERMINATOR);
        buf.freeze()
    }
}

/// Command text without the terminator; used in error messages.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LedOn => f.write_str("CAL,0,1"),
            Self::LedOff => f.write_str("CAL,0,0"),
            Self::SaveParams => f.write_str("CAL,1,1"),
            Self::Get(param) => write!(f, "GET,{}", param.index()),
            Self::Set(param, value) => write!(f, "SET,{},{value}", param.index()),
            Self::GetSerialNumber => f.write_str("GET,SER_NUMBER"),
            Self::SetSerialNumber(value) => write!(f, "SET,SER_NUMBER,{value}"),
            Self::RunRp { use_blanks } => write!(f, "RUN_RP,{}", u8::from(*use_blanks)),
            Self::Run(args) => write!(f, "RUN,{args}"),
            Self::FirmwareVersion => f.write_str("FWVERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_wire_format() {
        assert_eq!(&Command::LedOn.encode()[..], b"CAL,0,1\r\n");
        assert_eq!(&Command::LedOff.encode()[..], b"CAL,0,0\r\n");
        assert_eq!(&Command::SaveParams.encode()[..], b"CAL,1,1\r\n");
        assert_eq!(&Command::FirmwareVersion.encode()[..], b"FWVERSION\r\n");
        assert_eq!(&Command::GetSerialNumber.encode()[..], b"GET,SER_NUMBER\r\n");
    }

    #[test]
    fn test_parameter_commands_use_index() {
        assert_eq!(Command::Get(Param::LedDrive).to_string(), "GET,1");
        assert_eq!(
            Command::Set(Param::RefBlank, "4000".into()).to_string(),
            "SET,4,4000"
        );
        assert_eq!(
            Command::SetSerialNumber("AB12CD34EF56".into()).to_string(),
            "SET,SER_NUMBER,AB12CD34EF56"
        );
    }

    #[test]
    fn test_run_commands() {
        assert_eq!(Command::RunRp { use_blanks: true }.to_string(), "RUN_RP,1");
        assert_eq!(Command::RunRp { use_blanks: false }.to_string(), "RUN_RP,0");
        assert_eq!(
            Command::Run("T1,PH7,30,5".into()).to_string(),
            "RUN,T1,PH7,30,5"
        );
    }
}
