use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use derive_getters::Getters;

use crate::buffer::MemoryBuffer;
use crate::config::{CompatibleMode, Config};
use crate::constants::{FIRST_USER_TYPE_ID, MAX_USER_TYPE_ID};
use crate::meta_string::{MetaReaderState, MetaStringBytes, MetaStringResolver, MetaWriterState};
use crate::result::{Error, Result};
use crate::serializer::{
    BinarySerializer, BoolArraySerializer, BoolSerializer, DecimalSerializer, DurationSerializer,
    EnumSerializer, Float32ArraySerializer, Float32Serializer, Float64ArraySerializer,
    Float64Serializer, Int16ArraySerializer, Int16Serializer, Int32ArraySerializer,
    Int32Serializer, Int64ArraySerializer, Int64Serializer, Int8Serializer, ListSerializer,
    LocalDateSerializer, MapSerializer, Serializer, SerializerShape, SetSerializer,
    StringSerializer, StructSerializer, TimestampSerializer,
};
use crate::types::{Kind, RuntimeType, TypeId};
use crate::value::Value;

pub type TypeChecker = Box<dyn Fn(&str) -> bool>;

#[derive(Getters)]
pub struct ClassInfo {
    runtime_type: RuntimeType,
    type_id: TypeId,
    qualified_name: Option<Rc<str>>,
    namespace: Option<Rc<MetaStringBytes>>,
    type_name: Option<Rc<MetaStringBytes>>,
    serializer: Rc<dyn Serializer>,
    ref_elements: bool,
}

impl fmt::Debug for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassInfo")
            .field("runtime_type", &self.runtime_type)
            .field("type_id", &self.type_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NamedShape {
    Struct,
    Enum,
}

pub struct ClassResolver {
    classes: HashMap<RuntimeType, Rc<ClassInfo>>,
    by_id: HashMap<u32, Rc<ClassInfo>>,
    by_name: HashMap<(u64, u64), Rc<ClassInfo>>,
    used_user_ids: HashSet<u32>,
    next_auto_id: u32,
    inline: Option<(RuntimeType, Rc<ClassInfo>)>,
    pool: Rc<RefCell<MetaStringResolver>>,
    checker: Option<TypeChecker>,
    compatible: bool,
    allow_unexistent: bool,
}

impl ClassResolver {
    pub fn new(config: &Config, pool: Rc<RefCell<MetaStringResolver>>) -> Self {
        let mut resolver = Self {
            classes: HashMap::new(),
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            used_user_ids: HashSet::new(),
            next_auto_id: FIRST_USER_TYPE_ID,
            inline: None,
            pool,
            checker: None,
            compatible: config.compatible_mode == CompatibleMode::Compatible,
            allow_unexistent: config.deserialize_unexistent_class
                || !config.require_class_registration,
        };
        resolver.bootstrap();
        resolver
    }

    fn bootstrap(&mut self) {
        let defaults: [(RuntimeType, Kind, Rc<dyn Serializer>, bool); 22] = [
            (RuntimeType::Bool, Kind::Bool, Rc::new(BoolSerializer), false),
            (RuntimeType::Int8, Kind::Int8, Rc::new(Int8Serializer), false),
            (RuntimeType::Int16, Kind::Int16, Rc::new(Int16Serializer), false),
            (RuntimeType::Int32, Kind::Int32, Rc::new(Int32Serializer), false),
            (RuntimeType::Int64, Kind::Int64, Rc::new(Int64Serializer), false),
            (RuntimeType::Float32, Kind::Float32, Rc::new(Float32Serializer), false),
            (RuntimeType::Float64, Kind::Float64, Rc::new(Float64Serializer), false),
            (RuntimeType::String, Kind::String, Rc::new(StringSerializer), false),
            (RuntimeType::Binary, Kind::Binary, Rc::new(BinarySerializer), false),
            (RuntimeType::Duration, Kind::Duration, Rc::new(DurationSerializer), false),
            (RuntimeType::Timestamp, Kind::Timestamp, Rc::new(TimestampSerializer), false),
            (RuntimeType::LocalDate, Kind::LocalDate, Rc::new(LocalDateSerializer), false),
            (RuntimeType::Decimal, Kind::Decimal, Rc::new(DecimalSerializer), false),
            (RuntimeType::List, Kind::List, Rc::new(ListSerializer), true),
            (RuntimeType::Set, Kind::Set, Rc::new(SetSerializer), true),
            (RuntimeType::Map, Kind::Map, Rc::new(MapSerializer), true),
            (RuntimeType::BoolArray, Kind::BoolArray, Rc::new(BoolArraySerializer), false),
            (RuntimeType::Int16Array, Kind::Int16Array, Rc::new(Int16ArraySerializer), false),
            (RuntimeType::Int32Array, Kind::Int32Array, Rc::new(Int32ArraySerializer), false),
            (RuntimeType::Int64Array, Kind::Int64Array, Rc::new(Int64ArraySerializer), false),
            (RuntimeType::Float32Array, Kind::Float32Array, Rc::new(Float32ArraySerializer), false),
            (RuntimeType::Float64Array, Kind::Float64Array, Rc::new(Float64ArraySerializer), false),
        ];
        for (runtime_type, kind, serializer, ref_elements) in defaults {
            let info = Rc::new(ClassInfo {
                runtime_type: runtime_type.clone(),
                type_id: TypeId::builtin(kind),
                qualified_name: None,
                namespace: None,
                type_name: None,
                serializer,
                ref_elements,
            });
            self.by_id.insert(info.type_id.raw(), info.clone());
            self.classes.insert(runtime_type, info);
        }
    }

    pub fn set_checker(&mut self, checker: TypeChecker) {
        self.checker = Some(checker);
    }

    fn check_policy(&self, qualified: &str) -> Result<()> {
        match &self.checker {
            Some(checker) if !checker(qualified) => {
                Err(Error::PolicyViolation(qualified.to_string()))
            }
            _ => Ok(()),
        }
    }

    pub fn register_auto(&mut self, qualified: &str) -> Result<u32> {
        self.register_auto_shaped(qualified, NamedShape::Struct)
    }

    pub fn register_enum_auto(&mut self, qualified: &str) -> Result<u32> {
        self.register_auto_shaped(qualified, NamedShape::Enum)
    }

    fn register_auto_shaped(&mut self, qualified: &str, shape: NamedShape) -> Result<u32> {
        let runtime_type = RuntimeType::Named(qualified.into());
        if self.classes.contains_key(&runtime_type) {
            return Err(Error::AlreadyRegistered(qualified.to_string()));
        }
        while self.used_user_ids.contains(&self.next_auto_id) {
            self.next_auto_id += 1;
        }
        let id = self.next_auto_id;
        if id >= MAX_USER_TYPE_ID {
            return Err(Error::IdOverflow(id));
        }
        self.register_numeric(qualified, id, shape)?;
        Ok(id)
    }

    pub fn register_with_id(&mut self, qualified: &str, id: u32) -> Result<()> {
        if id >= MAX_USER_TYPE_ID {
            return Err(Error::IdOverflow(id));
        }
        let runtime_type = RuntimeType::Named(qualified.into());
        if let Some(existing) = self.classes.get(&runtime_type) {
            if existing.type_id.user_id() == id {
                return Ok(());
            }
            return Err(Error::AlreadyRegistered(qualified.to_string()));
        }
        if self.used_user_ids.contains(&id) {
            return Err(Error::IdReused(id));
        }
        self.register_numeric(qualified, id, NamedShape::Struct)
    }

    fn register_numeric(&mut self, qualified: &str, id: u32, shape: NamedShape) -> Result<()> {
        let name_rc: Rc<str> = qualified.into();
        let kind = match shape {
            NamedShape::Struct if self.compatible => Kind::CompatibleStruct,
            NamedShape::Struct => Kind::Struct,
            NamedShape::Enum => Kind::Enum,
        };
        let serializer: Rc<dyn Serializer> = match shape {
            NamedShape::Struct => Rc::new(StructSerializer::new(name_rc.clone())),
            NamedShape::Enum => Rc::new(EnumSerializer::new(name_rc.clone())),
        };
        let (namespace, simple) = split_qualified(qualified);
        let mut pool = self.pool.borrow_mut();
        let ns_meta = pool.intern_str(namespace)?;
        let name_meta = pool.intern_str(simple)?;
        drop(pool);
        let info = Rc::new(ClassInfo {
            runtime_type: RuntimeType::Named(name_rc.clone()),
            type_id: TypeId::new(kind, id),
            qualified_name: Some(name_rc),
            namespace: Some(ns_meta),
            type_name: Some(name_meta),
            serializer,
            ref_elements: false,
        });
        self.insert_by_id(&info);
        self.classes.insert(info.runtime_type.clone(), info);
        self.used_user_ids.insert(id);
        self.inline = None;
        Ok(())
    }

    pub fn register_by_name(&mut self, namespace: &str, name: &str) -> Result<()> {
        self.register_ns_shaped(namespace, name, NamedShape::Struct)
    }

    pub fn register_enum_by_name(&mut self, namespace: &str, name: &str) -> Result<()> {
        self.register_ns_shaped(namespace, name, NamedShape::Enum)
    }

    fn register_ns_shaped(&mut self, namespace: &str, name: &str, shape: NamedShape) -> Result<()> {
        if name.contains('.') {
            return Err(Error::NameContainsDot(name.to_string()));
        }
        let qualified = join_qualified(namespace, name);
        let mut pool = self.pool.borrow_mut();
        let ns_meta = pool.intern_str(namespace)?;
        let name_meta = pool.intern_str(name)?;
        drop(pool);
        let key = (ns_meta.hash(), name_meta.hash());
        if self.by_name.contains_key(&key) {
            return Err(Error::NameConflict(qualified));
        }
        let name_rc: Rc<str> = qualified.as_str().into();
        let runtime_type = RuntimeType::Named(name_rc.clone());
        if self.classes.contains_key(&runtime_type) {
            return Err(Error::AlreadyRegistered(qualified));
        }
        let kind = match shape {
            NamedShape::Struct if self.compatible => Kind::NsCompatibleStruct,
            NamedShape::Struct => Kind::NsStruct,
            NamedShape::Enum => Kind::NsEnum,
        };
        let serializer: Rc<dyn Serializer> = match shape {
            NamedShape::Struct => Rc::new(StructSerializer::new(name_rc.clone())),
            NamedShape::Enum => Rc::new(EnumSerializer::new(name_rc.clone())),
        };
        let info = Rc::new(ClassInfo {
            runtime_type: runtime_type.clone(),
            type_id: TypeId::builtin(kind),
            qualified_name: Some(name_rc),
            namespace: Some(ns_meta),
            type_name: Some(name_meta),
            serializer,
            ref_elements: false,
        });
        self.by_name.insert(key, info.clone());
        self.classes.insert(runtime_type, info);
        self.inline = None;
        Ok(())
    }

    pub fn register_serializer(
        &mut self,
        qualified: &str,
        serializer: Rc<dyn Serializer>,
    ) -> Result<()> {
        let runtime_type = RuntimeType::Named(qualified.into());
        let old = self
            .classes
            .get(&runtime_type)
            .cloned()
            .ok_or_else(|| Error::UnregisteredType(qualified.to_string()))?;
        let old_kind = old.type_id.kind()?;
        let namespaced = old_kind.is_namespaced();
        let kind = match (serializer.shape(), namespaced) {
            (SerializerShape::Struct, false) if self.compatible => Kind::CompatibleStruct,
            (SerializerShape::Struct, false) => Kind::Struct,
            (SerializerShape::Struct, true) if self.compatible => Kind::NsCompatibleStruct,
            (SerializerShape::Struct, true) => Kind::NsStruct,
            (SerializerShape::Enum, false) => Kind::Enum,
            (SerializerShape::Enum, true) => Kind::NsEnum,
            (SerializerShape::Ext, false) => Kind::Ext,
            (SerializerShape::Ext, true) => Kind::NsExt,
        };
        let info = Rc::new(ClassInfo {
            runtime_type: runtime_type.clone(),
            type_id: TypeId::new(kind, old.type_id.user_id()),
            qualified_name: old.qualified_name.clone(),
            namespace: old.namespace.clone(),
            type_name: old.type_name.clone(),
            serializer,
            ref_elements: old.ref_elements,
        });
        if namespaced {
            let key = name_key(&old)?;
            self.by_name.insert(key, info.clone());
        } else {
            self.remove_by_id(old.type_id);
            self.insert_by_id(&info);
        }
        self.classes.insert(runtime_type, info);
        self.inline = None;
        Ok(())
    }

    fn insert_by_id(&mut self, info: &Rc<ClassInfo>) {
        let type_id = info.type_id;
        if type_id.kind().is_ok_and(Kind::is_struct_kind) {
            // resolvable from peers in either compatibility mode
            let user_id = type_id.user_id();
            self.by_id
                .insert(TypeId::new(Kind::Struct, user_id).raw(), info.clone());
            self.by_id
                .insert(TypeId::new(Kind::CompatibleStruct, user_id).raw(), info.clone());
        } else {
            self.by_id.insert(type_id.raw(), info.clone());
        }
    }

    fn remove_by_id(&mut self, type_id: TypeId) {
        if type_id.kind().is_ok_and(Kind::is_struct_kind) {
            let user_id = type_id.user_id();
            self.by_id.remove(&TypeId::new(Kind::Struct, user_id).raw());
            self.by_id
                .remove(&TypeId::new(Kind::CompatibleStruct, user_id).raw());
        } else {
            self.by_id.remove(&type_id.raw());
        }
    }

    pub fn class_info_for(&mut self, value: &Value) -> Result<Rc<ClassInfo>> {
        let runtime_type = value
            .runtime_type()
            .ok_or(Error::TypeMismatch("null has no class info"))?;
        if let Some((cached, info)) = &self.inline {
            if *cached == runtime_type {
                return Ok(info.clone());
            }
        }
        let info = self
            .classes
            .get(&runtime_type)
            .cloned()
            .ok_or_else(|| Error::SerializerMissing(runtime_type.to_string()))?;
        self.inline = Some((runtime_type, info.clone()));
        Ok(info)
    }

    pub fn write_class_info(
        &mut self,
        meta: &mut MetaWriterState,
        buf: &mut MemoryBuffer,
        info: &ClassInfo,
    ) -> Result<()> {
        buf.write_var_uint32(info.type_id.raw());
        if info.type_id.kind()?.is_namespaced() {
            let namespace = info
                .namespace
                .as_ref()
                .ok_or(Error::Malformed("namespaced class without namespace"))?;
            let type_name = info
                .type_name
                .as_ref()
                .ok_or(Error::Malformed("namespaced class without type name"))?;
            meta.write(buf, namespace);
            meta.write(buf, type_name);
        }
        Ok(())
    }

    // returns the kind decoded from the wire alongside the registration;
    // a cached ClassInfo may carry the local compatibility variant instead
    pub fn read_class_info(
        &mut self,
        meta: &mut MetaReaderState,
        buf: &mut MemoryBuffer,
    ) -> Result<(Rc<ClassInfo>, Kind)> {
        let raw = buf.read_var_uint32()?;
        let type_id = TypeId::from_raw(raw);
        let kind = type_id.kind()?;
        if kind.is_namespaced() {
            let info = self.read_ns_class_info(meta, buf, type_id, kind)?;
            Ok((info, kind))
        } else {
            if let Some(info) = self.by_id.get(&raw) {
                return Ok((info.clone(), kind));
            }
            let described = format!("type id {raw}");
            if kind.is_ext_kind() {
                return Err(Error::UnregisteredSerializer(described));
            }
            if !kind.is_struct_kind() && !kind.is_enum_kind() {
                return Err(Error::Malformed("unknown builtin type id"));
            }
            if !self.allow_unexistent {
                return Err(Error::UnregisteredType(described));
            }
            let placeholder = format!("<unregistered:{}>", type_id.user_id());
            log::debug!("fabricating placeholder class for {described}");
            let info = self.fabricate(type_id, kind, placeholder.as_str().into(), None, None)?;
            self.insert_by_id(&info);
            self.classes.insert(info.runtime_type.clone(), info.clone());
            Ok((info, kind))
        }
    }

    fn read_ns_class_info(
        &mut self,
        meta: &mut MetaReaderState,
        buf: &mut MemoryBuffer,
        type_id: TypeId,
        kind: Kind,
    ) -> Result<Rc<ClassInfo>> {
        let namespace = meta.read(buf, &mut self.pool.borrow_mut())?;
        let type_name = meta.read(buf, &mut self.pool.borrow_mut())?;
        let key = (namespace.hash(), type_name.hash());
        if let Some(info) = self.by_name.get(&key).cloned() {
            if let Some(qualified) = &info.qualified_name {
                self.check_policy(qualified)?;
            }
            return Ok(info);
        }
        let qualified = join_qualified(&namespace.decode_string()?, &type_name.decode_string()?);
        self.check_policy(&qualified)?;
        if kind.is_ext_kind() {
            return Err(Error::UnregisteredSerializer(qualified));
        }
        if !self.allow_unexistent {
            return Err(Error::UnregisteredType(qualified));
        }
        log::debug!("fabricating placeholder class for {qualified}");
        let info = self.fabricate(
            type_id,
            kind,
            qualified.as_str().into(),
            Some(namespace),
            Some(type_name),
        )?;
        self.by_name.insert(key, info.clone());
        self.classes.insert(info.runtime_type.clone(), info.clone());
        Ok(info)
    }

    fn fabricate(
        &mut self,
        type_id: TypeId,
        kind: Kind,
        qualified: Rc<str>,
        namespace: Option<Rc<MetaStringBytes>>,
        type_name: Option<Rc<MetaStringBytes>>,
    ) -> Result<Rc<ClassInfo>> {
        let serializer: Rc<dyn Serializer> = if kind.is_enum_kind() {
            Rc::new(EnumSerializer::new(qualified.clone()))
        } else {
            Rc::new(StructSerializer::placeholder(qualified.clone()))
        };
        Ok(Rc::new(ClassInfo {
            runtime_type: RuntimeType::Named(qualified.clone()),
            type_id,
            qualified_name: Some(qualified),
            namespace,
            type_name,
            serializer,
            ref_elements: false,
        }))
    }
}

impl fmt::Debug for ClassResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassResolver")
            .field("classes", &self.classes.len())
            .field("next_auto_id", &self.next_auto_id)
            .finish_non_exhaustive()
    }
}

fn name_key(info: &ClassInfo) -> Result<(u64, u64)> {
    let namespace = info
        .namespace
        .as_ref()
        .ok_or(Error::Malformed("namespaced class without namespace"))?;
    let type_name = info
        .type_name
        .as_ref()
        .ok_or(Error::Malformed("namespaced class without type name"))?;
    Ok((namespace.hash(), type_name.hash()))
}

fn split_qualified(qualified: &str) -> (&str, &str) {
    match qualified.rsplit_once('.') {
        Some((namespace, simple)) => (namespace, simple),
        None => ("", qualified),
    }
}

fn join_qualified(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}
