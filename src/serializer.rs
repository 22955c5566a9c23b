use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::buffer::MemoryBuffer;
use crate::config::{CompatibleMode, Config, LongEncoding};
use crate::hash::hash64;
use crate::meta_string::{MetaReaderState, MetaWriterState};
use crate::refs::{RefReader, RefTag, RefWriter};
use crate::resolver::ClassResolver;
use crate::result::{Error, Result};
use crate::types::Kind;
use crate::value::{Decimal, EnumValue, Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializerShape {
    Struct,
    Enum,
    Ext,
}

pub trait Serializer {
    fn write(&self, ctx: &mut WriteContext, buf: &mut MemoryBuffer, value: &Value) -> Result<()>;
    fn read(&self, ctx: &mut ReadContext, buf: &mut MemoryBuffer) -> Result<Value>;
    fn copy(&self, ctx: &mut CopyContext, value: &Value) -> Result<Value>;

    fn shape(&self) -> SerializerShape {
        SerializerShape::Ext
    }

    fn needs_tracking(&self) -> bool {
        true
    }
}

pub struct WriteContext<'a> {
    config: &'a Config,
    resolver: &'a mut ClassResolver,
    meta: &'a mut MetaWriterState,
    refs: RefWriter,
    depth: u32,
}

impl<'a> WriteContext<'a> {
    pub(crate) fn new(
        config: &'a Config,
        resolver: &'a mut ClassResolver,
        meta: &'a mut MetaWriterState,
    ) -> Self {
        Self {
            config,
            resolver,
            meta,
            refs: RefWriter::default(),
            depth: 0,
        }
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    pub fn write_ref(&mut self, buf: &mut MemoryBuffer, value: &Value) -> Result<()> {
        if value.is_null() {
            buf.write_u8(RefTag::Null as u8);
            return Ok(());
        }
        let info = self.resolver.class_info_for(value)?;
        let serializer = info.serializer().clone();
        let tracked = self.config.track_ref
            && serializer.needs_tracking()
            && self.family_tracked(value);
        match value.identity().filter(|_| tracked) {
            Some(identity) => match self.refs.observe(identity) {
                Some(seq) => {
                    buf.write_u8(RefTag::Ref as u8);
                    buf.write_var_uint32(seq);
                    return Ok(());
                }
                None => buf.write_u8(RefTag::TrackFirst as u8),
            },
            None => buf.write_u8(RefTag::NotNullValue as u8),
        }

        self.depth += 1;
        if !self.config.track_ref && self.depth > self.config.max_depth {
            return Err(Error::CircularWithoutTracking);
        }
        self.resolver.write_class_info(self.meta, buf, &info)?;
        let result = serializer.write(self, buf, value);
        self.depth -= 1;
        result
    }

    fn family_tracked(&self, value: &Value) -> bool {
        if value.is_string() {
            return !self.config.string_ref_suppressed();
        }
        if value.is_time() {
            return !self.config.ignore_time_ref;
        }
        if value.is_basic() {
            return !self.config.ignore_basic_types_ref;
        }
        true
    }
}

pub struct ReadContext<'a> {
    config: &'a Config,
    resolver: &'a mut ClassResolver,
    meta: &'a mut MetaReaderState,
    refs: RefReader,
    pending: Option<usize>,
    kind: Kind,
    compress_int: bool,
    long_encoding: LongEncoding,
}

impl<'a> ReadContext<'a> {
    pub(crate) fn new(
        config: &'a Config,
        resolver: &'a mut ClassResolver,
        meta: &'a mut MetaReaderState,
        compress_int: bool,
        long_compressed: bool,
    ) -> Self {
        let long_encoding = if long_compressed {
            match config.long_encoding {
                LongEncoding::LeRawBytes => LongEncoding::Sli,
                other => other,
            }
        } else {
            LongEncoding::LeRawBytes
        };
        Self {
            config,
            resolver,
            meta,
            refs: RefReader::default(),
            pending: None,
            kind: Kind::Struct,
            compress_int,
            long_encoding,
        }
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    pub fn current_kind(&self) -> Kind {
        self.kind
    }

    fn compress_int(&self) -> bool {
        self.compress_int
    }

    fn long_encoding(&self) -> LongEncoding {
        self.long_encoding
    }

    pub fn read_ref(&mut self, buf: &mut MemoryBuffer) -> Result<Value> {
        match RefTag::from_u8(buf.read_u8()?)? {
            RefTag::Null => Ok(Value::Null),
            RefTag::Ref => {
                let seq = buf.read_var_uint32()?;
                self.refs.get(seq)
            }
            RefTag::NotNullValue => self.read_value(buf, None),
            RefTag::TrackFirst => {
                let slot = self.refs.reserve();
                self.read_value(buf, Some(slot))
            }
        }
    }

    fn read_value(&mut self, buf: &mut MemoryBuffer, slot: Option<usize>) -> Result<Value> {
        let (info, wire_kind) = self.resolver.read_class_info(self.meta, buf)?;
        let serializer = info.serializer().clone();
        let prev_pending = std::mem::replace(&mut self.pending, slot);
        let prev_kind = std::mem::replace(&mut self.kind, wire_kind);
        let value = serializer.read(self, buf)?;
        self.kind = prev_kind;
        if let Some(slot) = self.pending.take() {
            self.refs.fill(slot, value.clone());
        }
        self.pending = prev_pending;
        Ok(value)
    }

    // container serializers self-register before descending into children
    pub fn claim_ref(&mut self, value: Value) {
        if let Some(slot) = self.pending.take() {
            self.refs.fill(slot, value);
        }
    }
}

pub struct CopyContext<'a> {
    resolver: &'a mut ClassResolver,
    seen: HashMap<usize, Value>,
}

impl<'a> CopyContext<'a> {
    pub(crate) fn new(resolver: &'a mut ClassResolver) -> Self {
        Self {
            resolver,
            seen: HashMap::new(),
        }
    }

    pub fn copy_ref(&mut self, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        if let Some(identity) = value.identity() {
            if let Some(copied) = self.seen.get(&identity) {
                return Ok(copied.clone());
            }
        }
        let info = self.resolver.class_info_for(value)?;
        let serializer = info.serializer().clone();
        serializer.copy(self, value)
    }

    pub fn record_copy(&mut self, original: &Value, copy: &Value) {
        if let Some(identity) = original.identity() {
            self.seen.insert(identity, copy.clone());
        }
    }
}

pub(crate) fn version_hash(type_name: &str) -> u32 {
    hash64(type_name.as_bytes()) as u32
}

macro_rules! expect_value {
    ($value:expr, $variant:ident, $what:literal) => {
        match $value {
            Value::$variant(inner) => inner,
            _ => return Err(Error::TypeMismatch($what)),
        }
    };
}

pub(crate) struct BoolSerializer;

impl Serializer for BoolSerializer {
    fn write(&self, _ctx: &mut WriteContext, buf: &mut MemoryBuffer, value: &Value) -> Result<()> {
        buf.write_bool(*expect_value!(value, Bool, "bool"));
        Ok(())
    }

    fn read(&self, _ctx: &mut ReadContext, buf: &mut MemoryBuffer) -> Result<Value> {
        Ok(Value::Bool(buf.read_bool()?))
    }

    fn copy(&self, _ctx: &mut CopyContext, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }

    fn needs_tracking(&self) -> bool {
        false
    }
}

macro_rules! fixed_serializer {
    ($name:ident, $variant:ident, $write:ident, $read:ident, $what:literal) => {
        pub(crate) struct $name;

        impl Serializer for $name {
            fn write(
                &self,
                _ctx: &mut WriteContext,
                buf: &mut MemoryBuffer,
                value: &Value,
            ) -> Result<()> {
                buf.$write(*expect_value!(value, $variant, $what));
                Ok(())
            }

            fn read(&self, _ctx: &mut ReadContext, buf: &mut MemoryBuffer) -> Result<Value> {
                Ok(Value::$variant(buf.$read()?))
            }

            fn copy(&self, _ctx: &mut CopyContext, value: &Value) -> Result<Value> {
                Ok(value.clone())
            }

            fn needs_tracking(&self) -> bool {
                false
            }
        }
    };
}

fixed_serializer!(Int8Serializer, Int8, write_i8, read_i8, "int8");
fixed_serializer!(Int16Serializer, Int16, write_i16, read_i16, "int16");
fixed_serializer!(Float32Serializer, Float32, write_f32, read_f32, "float32");
fixed_serializer!(Float64Serializer, Float64, write_f64, read_f64, "float64");
fixed_serializer!(DurationSerializer, Duration, write_i64, read_i64, "duration");
fixed_serializer!(TimestampSerializer, Timestamp, write_i64, read_i64, "timestamp");
fixed_serializer!(LocalDateSerializer, LocalDate, write_i32, read_i32, "local date");

pub(crate) struct Int32Serializer;

impl Serializer for Int32Serializer {
    fn write(&self, ctx: &mut WriteContext, buf: &mut MemoryBuffer, value: &Value) -> Result<()> {
        let value = *expect_value!(value, Int32, "int32");
        if ctx.config().compress_int {
            buf.write_var_int32(value);
        } else {
            buf.write_i32(value);
        }
        Ok(())
    }

    fn read(&self, ctx: &mut ReadContext, buf: &mut MemoryBuffer) -> Result<Value> {
        let value = if ctx.compress_int() {
            buf.read_var_int32()?
        } else {
            buf.read_i32()?
        };
        Ok(Value::Int32(value))
    }

    fn copy(&self, _ctx: &mut CopyContext, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }

    fn needs_tracking(&self) -> bool {
        false
    }
}

pub(crate) struct Int64Serializer;

impl Serializer for Int64Serializer {
    fn write(&self, ctx: &mut WriteContext, buf: &mut MemoryBuffer, value: &Value) -> Result<()> {
        let value = *expect_value!(value, Int64, "int64");
        match ctx.config().long_encoding {
            LongEncoding::Sli => buf.write_sli_i64(value),
            LongEncoding::LeRawBytes => buf.write_i64(value),
            LongEncoding::Pvl => {
                buf.write_var_int64(value);
            }
        }
        Ok(())
    }

    fn read(&self, ctx: &mut ReadContext, buf: &mut MemoryBuffer) -> Result<Value> {
        let value = match ctx.long_encoding() {
            LongEncoding::Sli => buf.read_sli_i64()?,
            LongEncoding::LeRawBytes => buf.read_i64()?,
            LongEncoding::Pvl => buf.read_var_int64()?,
        };
        Ok(Value::Int64(value))
    }

    fn copy(&self, _ctx: &mut CopyContext, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }

    fn needs_tracking(&self) -> bool {
        false
    }
}

pub(crate) struct StringSerializer;

impl Serializer for StringSerializer {
    fn write(&self, ctx: &mut WriteContext, buf: &mut MemoryBuffer, value: &Value) -> Result<()> {
        let value = expect_value!(value, String, "string");
        let bytes = value.as_bytes();
        let ascii = ctx.config().compress_string && value.is_ascii();
        buf.write_var_uint32((bytes.len() as u32) << 1 | u32::from(ascii));
        buf.write_bytes(bytes);
        Ok(())
    }

    fn read(&self, _ctx: &mut ReadContext, buf: &mut MemoryBuffer) -> Result<Value> {
        let header = buf.read_var_uint32()?;
        let len = (header >> 1) as usize;
        let bytes = buf.read_bytes(len)?;
        let text =
            String::from_utf8(bytes).map_err(|_| Error::Malformed("string is not valid UTF-8"))?;
        Ok(Value::String(text.into()))
    }

    fn copy(&self, ctx: &mut CopyContext, value: &Value) -> Result<Value> {
        let copy = value.clone();
        ctx.record_copy(value, &copy);
        Ok(copy)
    }
}

pub(crate) struct BinarySerializer;

impl Serializer for BinarySerializer {
    fn write(&self, _ctx: &mut WriteContext, buf: &mut MemoryBuffer, value: &Value) -> Result<()> {
        let bytes = expect_value!(value, Binary, "binary");
        buf.write_var_uint32(bytes.len() as u32);
        buf.write_bytes(bytes);
        Ok(())
    }

    fn read(&self, _ctx: &mut ReadContext, buf: &mut MemoryBuffer) -> Result<Value> {
        let len = buf.read_var_uint32()? as usize;
        Ok(Value::Binary(buf.read_bytes(len)?.into()))
    }

    fn copy(&self, ctx: &mut CopyContext, value: &Value) -> Result<Value> {
        let copy = value.clone();
        ctx.record_copy(value, &copy);
        Ok(copy)
    }
}

pub(crate) struct DecimalSerializer;

impl Serializer for DecimalSerializer {
    fn write(&self, _ctx: &mut WriteContext, buf: &mut MemoryBuffer, value: &Value) -> Result<()> {
        let decimal = expect_value!(value, Decimal, "decimal");
        buf.write_var_int32(decimal.scale);
        buf.write_var_uint32(decimal.magnitude.len() as u32);
        buf.write_bytes(&decimal.magnitude);
        Ok(())
    }

    fn read(&self, _ctx: &mut ReadContext, buf: &mut MemoryBuffer) -> Result<Value> {
        let scale = buf.read_var_int32()?;
        let len = buf.read_var_uint32()? as usize;
        let magnitude = buf.read_bytes(len)?;
        Ok(Value::Decimal(Rc::new(Decimal { scale, magnitude })))
    }

    fn copy(&self, ctx: &mut CopyContext, value: &Value) -> Result<Value> {
        let copy = value.clone();
        ctx.record_copy(value, &copy);
        Ok(copy)
    }
}

pub(crate) struct ListSerializer;

impl ListSerializer {
    fn write_items(
        ctx: &mut WriteContext,
        buf: &mut MemoryBuffer,
        items: &RefCell<Vec<Value>>,
    ) -> Result<()> {
        let items = items.borrow();
        buf.write_var_uint32(items.len() as u32);
        for item in items.iter() {
            ctx.write_ref(buf, item)?;
        }
        Ok(())
    }

    fn read_items(ctx: &mut ReadContext, buf: &mut MemoryBuffer, value: &Value) -> Result<()> {
        let items = match value {
            Value::List(items) | Value::Set(items) => items,
            _ => return Err(Error::TypeMismatch("sequence")),
        };
        let len = buf.read_var_uint32()? as usize;
        ctx.claim_ref(value.clone());
        for _ in 0..len {
            let item = ctx.read_ref(buf)?;
            items.borrow_mut().push(item);
        }
        Ok(())
    }

    fn copy_items(
        ctx: &mut CopyContext,
        original: &Value,
        items: &RefCell<Vec<Value>>,
        copy: &Value,
        target: &RefCell<Vec<Value>>,
    ) -> Result<()> {
        ctx.record_copy(original, copy);
        let items = items.borrow();
        for item in items.iter() {
            let copied = ctx.copy_ref(item)?;
            target.borrow_mut().push(copied);
        }
        Ok(())
    }
}

impl Serializer for ListSerializer {
    fn write(&self, ctx: &mut WriteContext, buf: &mut MemoryBuffer, value: &Value) -> Result<()> {
        Self::write_items(ctx, buf, expect_value!(value, List, "list"))
    }

    fn read(&self, ctx: &mut ReadContext, buf: &mut MemoryBuffer) -> Result<Value> {
        let value = Value::List(Rc::new(RefCell::new(Vec::new())));
        Self::read_items(ctx, buf, &value)?;
        Ok(value)
    }

    fn copy(&self, ctx: &mut CopyContext, value: &Value) -> Result<Value> {
        let items = expect_value!(value, List, "list");
        let target = Rc::new(RefCell::new(Vec::new()));
        let copy = Value::List(target.clone());
        Self::copy_items(ctx, value, items, &copy, &target)?;
        Ok(copy)
    }
}

pub(crate) struct SetSerializer;

impl Serializer for SetSerializer {
    fn write(&self, ctx: &mut WriteContext, buf: &mut MemoryBuffer, value: &Value) -> Result<()> {
        ListSerializer::write_items(ctx, buf, expect_value!(value, Set, "set"))
    }

    fn read(&self, ctx: &mut ReadContext, buf: &mut MemoryBuffer) -> Result<Value> {
        let value = Value::Set(Rc::new(RefCell::new(Vec::new())));
        ListSerializer::read_items(ctx, buf, &value)?;
        Ok(value)
    }

    fn copy(&self, ctx: &mut CopyContext, value: &Value) -> Result<Value> {
        let items = expect_value!(value, Set, "set");
        let target = Rc::new(RefCell::new(Vec::new()));
        let copy = Value::Set(target.clone());
        ListSerializer::copy_items(ctx, value, items, &copy, &target)?;
        Ok(copy)
    }
}

pub(crate) struct MapSerializer;

impl Serializer for MapSerializer {
    fn write(&self, ctx: &mut WriteContext, buf: &mut MemoryBuffer, value: &Value) -> Result<()> {
        let entries = expect_value!(value, Map, "map").borrow();
        buf.write_var_uint32(entries.len() as u32);
        for (key, val) in entries.iter() {
            ctx.write_ref(buf, key)?;
            ctx.write_ref(buf, val)?;
        }
        Ok(())
    }

    fn read(&self, ctx: &mut ReadContext, buf: &mut MemoryBuffer) -> Result<Value> {
        let len = buf.read_var_uint32()? as usize;
        let entries = Rc::new(RefCell::new(Vec::new()));
        let value = Value::Map(entries.clone());
        ctx.claim_ref(value.clone());
        for _ in 0..len {
            let key = ctx.read_ref(buf)?;
            let val = ctx.read_ref(buf)?;
            entries.borrow_mut().push((key, val));
        }
        Ok(value)
    }

    fn copy(&self, ctx: &mut CopyContext, value: &Value) -> Result<Value> {
        let entries = expect_value!(value, Map, "map");
        let target = Rc::new(RefCell::new(Vec::new()));
        let copy = Value::Map(target.clone());
        ctx.record_copy(value, &copy);
        let entries = entries.borrow();
        for (key, val) in entries.iter() {
            let key = ctx.copy_ref(key)?;
            let val = ctx.copy_ref(val)?;
            target.borrow_mut().push((key, val));
        }
        Ok(copy)
    }
}

macro_rules! array_serializer {
    ($name:ident, $variant:ident, $write:ident, $read:ident, $what:literal) => {
        pub(crate) struct $name;

        impl Serializer for $name {
            fn write(
                &self,
                _ctx: &mut WriteContext,
                buf: &mut MemoryBuffer,
                value: &Value,
            ) -> Result<()> {
                let items = expect_value!(value, $variant, $what);
                buf.write_var_uint32(items.len() as u32);
                for &item in items.iter() {
                    buf.$write(item);
                }
                Ok(())
            }

            fn read(&self, _ctx: &mut ReadContext, buf: &mut MemoryBuffer) -> Result<Value> {
                let len = buf.read_var_uint32()? as usize;
                let mut items = Vec::with_capacity(len.min(4096));
                for _ in 0..len {
                    items.push(buf.$read()?);
                }
                Ok(Value::$variant(items.into()))
            }

            fn copy(&self, ctx: &mut CopyContext, value: &Value) -> Result<Value> {
                let copy = value.clone();
                ctx.record_copy(value, &copy);
                Ok(copy)
            }
        }
    };
}

array_serializer!(BoolArraySerializer, BoolArray, write_bool, read_bool, "bool array");
array_serializer!(Int16ArraySerializer, Int16Array, write_i16, read_i16, "int16 array");
array_serializer!(Int32ArraySerializer, Int32Array, write_i32, read_i32, "int32 array");
array_serializer!(Int64ArraySerializer, Int64Array, write_i64, read_i64, "int64 array");
array_serializer!(Float32ArraySerializer, Float32Array, write_f32, read_f32, "float32 array");
array_serializer!(Float64ArraySerializer, Float64Array, write_f64, read_f64, "float64 array");

pub(crate) struct StructSerializer {
    type_name: Rc<str>,
    check_version: bool,
}

impl StructSerializer {
    pub(crate) fn new(type_name: Rc<str>) -> Self {
        Self {
            type_name,
            check_version: true,
        }
    }

    pub(crate) fn placeholder(type_name: Rc<str>) -> Self {
        Self {
            type_name,
            check_version: false,
        }
    }
}

impl Serializer for StructSerializer {
    fn write(&self, ctx: &mut WriteContext, buf: &mut MemoryBuffer, value: &Value) -> Result<()> {
        let record = expect_value!(value, Struct, "struct").borrow();
        if ctx.config().compatible_mode == CompatibleMode::SchemaConsistent {
            buf.write_u32(version_hash(&self.type_name));
        }
        buf.write_var_uint32(record.fields.len() as u32);
        for field in &record.fields {
            ctx.write_ref(buf, field)?;
        }
        Ok(())
    }

    fn read(&self, ctx: &mut ReadContext, buf: &mut MemoryBuffer) -> Result<Value> {
        // compatible struct kinds never carry a version hash
        if !ctx.current_kind().is_compatible_struct() {
            let version = buf.read_u32()?;
            if self.check_version && version != version_hash(&self.type_name) {
                return Err(Error::Malformed("class version mismatch"));
            }
        }
        let len = buf.read_var_uint32()? as usize;
        let record = Rc::new(RefCell::new(Record {
            type_name: self.type_name.clone(),
            fields: Vec::new(),
        }));
        let value = Value::Struct(record.clone());
        ctx.claim_ref(value.clone());
        for _ in 0..len {
            let field = ctx.read_ref(buf)?;
            record.borrow_mut().fields.push(field);
        }
        Ok(value)
    }

    fn copy(&self, ctx: &mut CopyContext, value: &Value) -> Result<Value> {
        let record = expect_value!(value, Struct, "struct");
        let target = Rc::new(RefCell::new(Record {
            type_name: record.borrow().type_name.clone(),
            fields: Vec::new(),
        }));
        let copy = Value::Struct(target.clone());
        ctx.record_copy(value, &copy);
        let record = record.borrow();
        for field in &record.fields {
            let copied = ctx.copy_ref(field)?;
            target.borrow_mut().fields.push(copied);
        }
        Ok(copy)
    }

    fn shape(&self) -> SerializerShape {
        SerializerShape::Struct
    }
}

pub(crate) struct EnumSerializer {
    type_name: Rc<str>,
}

impl EnumSerializer {
    pub(crate) fn new(type_name: Rc<str>) -> Self {
        Self { type_name }
    }
}

impl Serializer for EnumSerializer {
    fn write(&self, _ctx: &mut WriteContext, buf: &mut MemoryBuffer, value: &Value) -> Result<()> {
        let value = expect_value!(value, Enum, "enum");
        buf.write_var_uint32(value.ordinal);
        Ok(())
    }

    fn read(&self, _ctx: &mut ReadContext, buf: &mut MemoryBuffer) -> Result<Value> {
        let ordinal = buf.read_var_uint32()?;
        Ok(Value::Enum(Rc::new(EnumValue {
            type_name: self.type_name.clone(),
            ordinal,
        })))
    }

    fn copy(&self, _ctx: &mut CopyContext, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }

    fn shape(&self) -> SerializerShape {
        SerializerShape::Enum
    }

    fn needs_tracking(&self) -> bool {
        false
    }
}
