use std::fmt;
use std::rc::Rc;

use crate::result::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Bool = 1,
    Int8 = 2,
    Int16 = 3,
    Int32 = 4,
    VarInt32 = 5,
    Int64 = 6,
    VarInt64 = 7,
    SliInt64 = 8,
    Float16 = 9,
    Float32 = 10,
    Float64 = 11,
    String = 12,
    Enum = 13,
    NsEnum = 14,
    Struct = 15,
    PolymorphicStruct = 16,
    CompatibleStruct = 17,
    PolymorphicCompatibleStruct = 18,
    NsStruct = 19,
    NsPolymorphicStruct = 20,
    NsCompatibleStruct = 21,
    NsPolymorphicCompatibleStruct = 22,
    Ext = 23,
    PolymorphicExt = 24,
    NsExt = 25,
    NsPolymorphicExt = 26,
    List = 27,
    Set = 28,
    Map = 29,
    Duration = 30,
    Timestamp = 31,
    LocalDate = 32,
    Decimal = 33,
    Binary = 34,
    Array = 35,
    BoolArray = 36,
    Int8Array = 37,
    Int16Array = 38,
    Int32Array = 39,
    Int64Array = 40,
    Float16Array = 41,
    Float32Array = 42,
    Float64Array = 43,
    ArrowRecordBatch = 44,
    ArrowTable = 45,
}

impl Kind {
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        use Kind::*;
        const ALL: [Kind; 45] = [
            Bool, Int8, Int16, Int32, VarInt32, Int64, VarInt64, SliInt64, Float16, Float32,
            Float64, String, Enum, NsEnum, Struct, PolymorphicStruct, CompatibleStruct,
            PolymorphicCompatibleStruct, NsStruct, NsPolymorphicStruct, NsCompatibleStruct,
            NsPolymorphicCompatibleStruct, Ext, PolymorphicExt, NsExt, NsPolymorphicExt, List,
            Set, Map, Duration, Timestamp, LocalDate, Decimal, Binary, Array, BoolArray,
            Int8Array, Int16Array, Int32Array, Int64Array, Float16Array, Float32Array,
            Float64Array, ArrowRecordBatch, ArrowTable,
        ];
        ALL.get(usize::from(value).checked_sub(1)?).copied()
    }

    pub fn is_namespaced(self) -> bool {
        matches!(
            self,
            Kind::NsEnum
                | Kind::NsStruct
                | Kind::NsPolymorphicStruct
                | Kind::NsCompatibleStruct
                | Kind::NsPolymorphicCompatibleStruct
                | Kind::NsExt
                | Kind::NsPolymorphicExt
        )
    }

    pub fn is_struct_kind(self) -> bool {
        (Kind::Struct as u8..=Kind::NsPolymorphicCompatibleStruct as u8).contains(&(self as u8))
    }

    pub fn is_enum_kind(self) -> bool {
        matches!(self, Kind::Enum | Kind::NsEnum)
    }

    pub fn is_ext_kind(self) -> bool {
        matches!(
            self,
            Kind::Ext | Kind::PolymorphicExt | Kind::NsExt | Kind::NsPolymorphicExt
        )
    }

    pub fn is_compatible_struct(self) -> bool {
        matches!(
            self,
            Kind::CompatibleStruct
                | Kind::PolymorphicCompatibleStruct
                | Kind::NsCompatibleStruct
                | Kind::NsPolymorphicCompatibleStruct
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

impl TypeId {
    pub(crate) fn new(kind: Kind, user_id: u32) -> Self {
        Self((user_id << 8) | kind as u32)
    }

    pub(crate) fn builtin(kind: Kind) -> Self {
        Self::new(kind, 0)
    }

    pub(crate) fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn kind(self) -> Result<Kind> {
        Kind::from_u8((self.0 & 0xFF) as u8).ok_or(Error::Malformed("unknown internal kind"))
    }

    pub fn user_id(self) -> u32 {
        self.0 >> 8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuntimeType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Binary,
    Duration,
    Timestamp,
    LocalDate,
    Decimal,
    List,
    Set,
    Map,
    BoolArray,
    Int16Array,
    Int32Array,
    Int64Array,
    Float32Array,
    Float64Array,
    Named(Rc<str>),
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeType::Named(name) => f.write_str(name),
            other => write!(f, "{other:?}"),
        }
    }
}
