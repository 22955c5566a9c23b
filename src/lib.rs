use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use buffer::MemoryBuffer;
use config::{CompatibleMode, Config, Language, LongEncoding};
use meta_string::{MetaReaderState, MetaStringResolver, MetaWriterState};
use modular_bitfield::prelude::*;
use resolver::{ClassResolver, TypeChecker};
use result::{Error, Result};
use serializer::{CopyContext, ReadContext, Serializer, WriteContext};
use stream::StreamReader;
use value::Value;

pub mod buffer;
pub mod config;
mod constants;
mod hash;
pub mod meta_string;
pub mod refs;
pub mod resolver;
pub mod result;
pub mod serializer;
pub mod stream;
pub mod types;
pub mod value;

#[bitfield(bits = 8)]
#[derive(Debug, Clone, Copy)]
struct HeaderFlags {
    single_runtime: bool,
    track_ref: bool,
    compress_int: bool,
    compress_long: bool,
    share_meta: bool,
    #[skip]
    unused: B3,
}

#[derive(Debug)]
pub struct Codec {
    config: Config,
    resolver: ClassResolver,
    meta_writer: MetaWriterState,
    meta_reader: MetaReaderState,
}

impl Codec {
    pub fn new() -> Self {
        CodecBuilder::default().build()
    }

    pub fn builder() -> CodecBuilder {
        CodecBuilder::default()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn register(&mut self, qualified_name: &str) -> Result<u32> {
        self.resolver.register_auto(qualified_name)
    }

    pub fn register_with_id(&mut self, qualified_name: &str, id: u32) -> Result<()> {
        self.resolver.register_with_id(qualified_name, id)
    }

    pub fn register_by_name(&mut self, namespace: &str, name: &str) -> Result<()> {
        self.resolver.register_by_name(namespace, name)
    }

    pub fn register_enum(&mut self, qualified_name: &str) -> Result<u32> {
        self.resolver.register_enum_auto(qualified_name)
    }

    pub fn register_enum_by_name(&mut self, namespace: &str, name: &str) -> Result<()> {
        self.resolver.register_enum_by_name(namespace, name)
    }

    pub fn register_serializer(
        &mut self,
        qualified_name: &str,
        serializer: Rc<dyn Serializer>,
    ) -> Result<()> {
        self.resolver.register_serializer(qualified_name, serializer)
    }

    pub fn set_type_checker(&mut self, checker: TypeChecker) {
        self.resolver.set_checker(checker);
    }

    pub fn serialize(&mut self, value: &Value) -> Result<Vec<u8>> {
        let mut buf = MemoryBuffer::new();
        self.serialize_into(&mut buf, value)?;
        Ok(buf.into_vec())
    }

    pub fn serialize_into(&mut self, buf: &mut MemoryBuffer, value: &Value) -> Result<()> {
        self.write_header(buf);
        if !self.config.share_meta_context {
            self.meta_writer.reset();
        }
        let mut ctx = WriteContext::new(&self.config, &mut self.resolver, &mut self.meta_writer);
        ctx.write_ref(buf, value)
    }

    pub fn deserialize(&mut self, bytes: &[u8]) -> Result<Value> {
        self.deserialize_buffer(MemoryBuffer::from_vec(bytes.to_vec()))
    }

    pub fn deserialize_stream<R: io::Read + 'static>(&mut self, reader: R) -> Result<Value> {
        self.deserialize_buffer(MemoryBuffer::from_source(Box::new(StreamReader::new(reader))))
    }

    pub fn deserialize_buffer(&mut self, mut buf: MemoryBuffer) -> Result<Value> {
        let flags = self.read_header(&mut buf)?;
        if !(self.config.share_meta_context && flags.share_meta()) {
            self.meta_reader.reset();
        }
        let mut ctx = ReadContext::new(
            &self.config,
            &mut self.resolver,
            &mut self.meta_reader,
            flags.compress_int(),
            flags.compress_long(),
        );
        ctx.read_ref(&mut buf)
    }

    pub fn deep_copy(&mut self, value: &Value) -> Result<Value> {
        let mut ctx = CopyContext::new(&mut self.resolver);
        ctx.copy_ref(value)
    }

    fn write_header(&self, buf: &mut MemoryBuffer) {
        buf.write_u8(constants::MAGIC);
        let flags = HeaderFlags::new()
            .with_single_runtime(self.config.language == Language::SameRuntime)
            .with_track_ref(self.config.track_ref)
            .with_compress_int(self.config.compress_int)
            .with_compress_long(self.config.long_encoding != LongEncoding::LeRawBytes)
            .with_share_meta(self.config.share_meta_context);
        buf.write_u8(flags.into_bytes()[0]);
        buf.write_u8(constants::FORMAT_VERSION);
        buf.write_u8(0);
    }

    fn read_header(&self, buf: &mut MemoryBuffer) -> Result<HeaderFlags> {
        if buf.read_u8()? != constants::MAGIC {
            return Err(Error::Malformed("bad magic byte"));
        }
        let flags = HeaderFlags::from_bytes([buf.read_u8()?]);
        if buf.read_u8()? != constants::FORMAT_VERSION {
            return Err(Error::Malformed("unsupported format version"));
        }
        let _reserved = buf.read_u8()?;
        Ok(flags)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CodecBuilder {
    config: Config,
    pool: Option<Rc<RefCell<MetaStringResolver>>>,
}

impl CodecBuilder {
    pub fn language(mut self, language: Language) -> Self {
        self.config.language = language;
        self
    }

    pub fn track_ref(mut self, on: bool) -> Self {
        self.config.track_ref = on;
        self
    }

    pub fn ignore_basic_types_ref(mut self, on: bool) -> Self {
        self.config.ignore_basic_types_ref = on;
        self
    }

    pub fn ignore_string_ref(mut self, on: bool) -> Self {
        self.config.ignore_string_ref = on;
        self
    }

    pub fn ignore_time_ref(mut self, on: bool) -> Self {
        self.config.ignore_time_ref = on;
        self
    }

    pub fn compress_int(mut self, on: bool) -> Self {
        self.config.compress_int = on;
        self
    }

    pub fn long_encoding(mut self, encoding: LongEncoding) -> Self {
        self.config.long_encoding = encoding;
        self
    }

    pub fn compress_string(mut self, on: bool) -> Self {
        self.config.compress_string = on;
        self
    }

    pub fn compatible_mode(mut self, mode: CompatibleMode) -> Self {
        self.config.compatible_mode = mode;
        self
    }

    pub fn require_class_registration(mut self, on: bool) -> Self {
        self.config.require_class_registration = on;
        self
    }

    pub fn deserialize_unexistent_class(mut self, on: bool) -> Self {
        self.config.deserialize_unexistent_class = on;
        self
    }

    pub fn share_meta_context(mut self, on: bool) -> Self {
        self.config.share_meta_context = on;
        self
    }

    pub fn max_depth(mut self, depth: u32) -> Self {
        self.config.max_depth = depth;
        self
    }

    pub fn shared_meta_pool(mut self, pool: Rc<RefCell<MetaStringResolver>>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn build(self) -> Codec {
        let pool = self.pool.unwrap_or_default();
        let resolver = ClassResolver::new(&self.config, pool);
        Codec {
            config: self.config,
            resolver,
            meta_writer: MetaWriterState::default(),
            meta_reader: MetaReaderState::default(),
        }
    }
}

impl Default for CodecBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            pool: None,
        }
    }
}
