use colsieve_base::{err, Result};

/// Attribute types as persisted in storage headers. The numeric codes
/// are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum AttrType {
    None = 0,
    Uint32 = 1,
    Timestamp = 2,
    Int64 = 3,
    Uint64 = 4,
    Boolean = 5,
    Float = 6,
    String = 7,
    Uint32Set = 8,
    Int64Set = 9,
}

impl AttrType {
    pub fn from_u32(v: u32) -> Result<Self> {
        Ok(match v {
            0 => AttrType::None,
            1 => AttrType::Uint32,
            2 => AttrType::Timestamp,
            3 => AttrType::Int64,
            4 => AttrType::Uint64,
            5 => AttrType::Boolean,
            6 => AttrType::Float,
            7 => AttrType::String,
            8 => AttrType::Uint32Set,
            9 => AttrType::Int64Set,
            _ => return Err(err(format!("unknown attribute type code {}", v))),
        })
    }

    pub fn is_set(self) -> bool {
        matches!(self, AttrType::Uint32Set | AttrType::Int64Set)
    }

    // Types whose values are stored (and min/max summarized) as 64 bits.
    pub fn is_wide(self) -> bool {
        matches!(
            self,
            AttrType::Int64 | AttrType::Uint64 | AttrType::Int64Set | AttrType::String
        )
    }

    // Types whose value range is the unsigned 32-bit domain.
    pub fn is_u32_domain(self) -> bool {
        matches!(
            self,
            AttrType::Uint32 | AttrType::Uint32Set | AttrType::Timestamp
        )
    }
}
