use tether_exit::{CpuId, GuestAddr};
use thiserror::Error;

use crate::config::ConfigError;
use crate::mem::MemError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("invalid VM configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("no such vCPU: {0}")]
    InvalidCpu(CpuId),
    #[error("guest address {0:#x} does not fit the 32-bit address space")]
    AddressOutOfRange(GuestAddr),
    #[error(transparent)]
    Mem(#[from] MemError),
}
