//! Burst Buffer RPC Protocol
//!
//! Defines the endpoint, method names and message types exchanged between
//! clients and server nodes.
//!
//! A request is a method name plus a positional argument list. A response is
//! either a [`Reply`] carrying a signed result code (0 = success, negative =
//! -errno, positive = size or descriptor) or an [`RpcError`], which is only
//! raised for unknown methods and malformed arguments, never for filesystem
//! failures. Messages are bincode-encoded and carried in HTTP POST bodies.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tier::types::{DirEntry, FileStat, StatVfs, TimeSpec};

// --- API Endpoints ---

/// Single RPC endpoint; the method is named inside the request body.
pub const ENDPOINT_RPC: &str = "/rpc";

// --- Methods ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GetAttr,
    ReadLink,
    MkDir,
    Unlink,
    RmDir,
    Symlink,
    Rename,
    Link,
    Chmod,
    Chown,
    Truncate,
    Open,
    Read,
    Write,
    StatFs,
    Flush,
    Release,
    FSync,
    ReadDir,
    FSyncDir,
    SetXAttr,
    GetXAttr,
    ListXAttr,
    RemoveXAttr,
    Access,
    Create,
    FTruncate,
    FGetAttr,
    Lock,
    Utimens,
    FilePrevRead,
    FileFlush,
    LocalFileExport,
}

impl Method {
    pub const ALL: [Method; 33] = [
        Method::GetAttr,
        Method::ReadLink,
        Method::MkDir,
        Method::Unlink,
        Method::RmDir,
        Method::Symlink,
        Method::Rename,
        Method::Link,
        Method::Chmod,
        Method::Chown,
        Method::Truncate,
        Method::Open,
        Method::Read,
        Method::Write,
        Method::StatFs,
        Method::Flush,
        Method::Release,
        Method::FSync,
        Method::ReadDir,
        Method::FSyncDir,
        Method::SetXAttr,
        Method::GetXAttr,
        Method::ListXAttr,
        Method::RemoveXAttr,
        Method::Access,
        Method::Create,
        Method::FTruncate,
        Method::FGetAttr,
        Method::Lock,
        Method::Utimens,
        Method::FilePrevRead,
        Method::FileFlush,
        Method::LocalFileExport,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Method::GetAttr => "GetAttr",
            Method::ReadLink => "ReadLink",
            Method::MkDir => "MkDir",
            Method::Unlink => "Unlink",
            Method::RmDir => "RmDir",
            Method::Symlink => "Symlink",
            Method::Rename => "Rename",
            Method::Link => "Link",
            Method::Chmod => "Chmod",
            Method::Chown => "Chown",
            Method::Truncate => "Truncate",
            Method::Open => "Open",
            Method::Read => "Read",
            Method::Write => "Write",
            Method::StatFs => "StatFs",
            Method::Flush => "Flush",
            Method::Release => "Release",
            Method::FSync => "FSync",
            Method::ReadDir => "ReadDir",
            Method::FSyncDir => "FSyncDir",
            Method::SetXAttr => "SetXAttr",
            Method::GetXAttr => "GetXAttr",
            Method::ListXAttr => "ListXAttr",
            Method::RemoveXAttr => "RemoveXAttr",
            Method::Access => "Access",
            Method::Create => "Create",
            Method::FTruncate => "FTruncate",
            Method::FGetAttr => "FGetAttr",
            Method::Lock => "Lock",
            Method::Utimens => "Utimens",
            Method::FilePrevRead => "FilePrevRead",
            Method::FileFlush => "FileFlush",
            Method::LocalFileExport => "LocalFileExport",
        }
    }

    pub fn from_name(name: &str) -> Option<Method> {
        Method::ALL.iter().copied().find(|m| m.name() == name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// --- Data Transfer Objects ---

/// One positional argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Arg {
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    Time(TimeSpec),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Vec<Arg>,
}

impl RpcRequest {
    pub fn new(method: Method, params: Vec<Arg>) -> Self {
        Self {
            method: method.name().to_string(),
            params,
        }
    }
}

/// Successful response payloads. `code` follows the signed convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Code(i64),
    Attr {
        code: i64,
        stat: FileStat,
        link: Option<String>,
    },
    Data {
        code: i64,
        bytes: Vec<u8>,
    },
    StatFs {
        code: i64,
        stat: StatVfs,
    },
    Dir {
        code: i64,
        entries: Vec<DirEntry>,
    },
    XAttr {
        code: i64,
        value: Vec<u8>,
    },
}

impl Reply {
    pub fn code(&self) -> i64 {
        match self {
            Reply::Code(code)
            | Reply::Attr { code, .. }
            | Reply::Data { code, .. }
            | Reply::StatFs { code, .. }
            | Reply::Dir { code, .. }
            | Reply::XAttr { code, .. } => *code,
        }
    }
}

/// Protocol-level failures. Filesystem errors never show up here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RpcError {
    #[error("no such method: {0}")]
    NoMethod(String),
    #[error("bad arguments: {0}")]
    BadArguments(String),
}

pub type RpcResponse = Result<Reply, RpcError>;

// --- Argument extraction ---

/// Positional reader over a request's arguments with arity and type checks.
pub struct Params<'a> {
    method: &'a str,
    args: &'a [Arg],
}

impl<'a> Params<'a> {
    /// Fails unless exactly `arity` arguments were sent.
    pub fn new(method: &'a str, args: &'a [Arg], arity: usize) -> Result<Self, RpcError> {
        if args.len() != arity {
            return Err(RpcError::BadArguments(format!(
                "{} expects {} argument(s), got {}",
                method,
                arity,
                args.len()
            )));
        }
        Ok(Self { method, args })
    }

    fn mismatch(&self, index: usize, expected: &str) -> RpcError {
        RpcError::BadArguments(format!(
            "{}: argument {} must be {}",
            self.method, index, expected
        ))
    }

    pub fn str(&self, index: usize) -> Result<&'a str, RpcError> {
        match &self.args[index] {
            Arg::Str(s) => Ok(s.as_str()),
            _ => Err(self.mismatch(index, "a string")),
        }
    }

    pub fn int(&self, index: usize) -> Result<i64, RpcError> {
        match &self.args[index] {
            Arg::Int(v) => Ok(*v),
            _ => Err(self.mismatch(index, "an integer")),
        }
    }

    pub fn bytes(&self, index: usize) -> Result<&'a [u8], RpcError> {
        match &self.args[index] {
            Arg::Bytes(b) => Ok(b.as_slice()),
            _ => Err(self.mismatch(index, "a byte string")),
        }
    }

    pub fn time(&self, index: usize) -> Result<TimeSpec, RpcError> {
        match &self.args[index] {
            Arg::Time(t) => Ok(*t),
            _ => Err(self.mismatch(index, "a timespec")),
        }
    }

    pub fn fd(&self, index: usize) -> Result<i32, RpcError> {
        let value = self.int(index)?;
        i32::try_from(value).map_err(|_| self.mismatch(index, "a descriptor"))
    }

    pub fn unsigned(&self, index: usize) -> Result<u64, RpcError> {
        let value = self.int(index)?;
        u64::try_from(value).map_err(|_| self.mismatch(index, "non-negative"))
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(value)
}

pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(bytes)
}
