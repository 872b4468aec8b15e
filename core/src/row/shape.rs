use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::row::value::{ColumnValue, ConversionError, SqlValue, ValueKind};

pub type Getter<T> = Arc<dyn Fn(&T) -> SqlValue + Send + Sync>;
pub type Setter<T> = Arc<dyn Fn(&mut T, SqlValue) -> Result<(), ConversionError> + Send + Sync>;

/// One addressable member of a row type.
///
/// Nested members are registered under their dotted path (`dimensions.width`) and read
/// through the whole chain of fields.
pub struct RowDescriptor<T> {
    name: String,
    kind: ValueKind,
    nullable: bool,
    getter: Option<Getter<T>>,
    setter: Option<Setter<T>>,
}

impl<T> Clone for RowDescriptor<T> {
    fn clone(&self) -> Self {
        RowDescriptor {
            name: self.name.clone(),
            kind: self.kind,
            nullable: self.nullable,
            getter: self.getter.clone(),
            setter: self.setter.clone(),
        }
    }
}

impl<T> fmt::Debug for RowDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("nullable", &self.nullable)
            .field("writable", &self.is_writable())
            .finish()
    }
}

impl<T> RowDescriptor<T> {
    pub fn new(
        name: impl Into<String>,
        kind: ValueKind,
        nullable: bool,
        getter: Option<Getter<T>>,
        setter: Option<Setter<T>>,
    ) -> Self {
        RowDescriptor { name: name.into(), kind, nullable, getter, setter }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_nested(&self) -> bool {
        self.name.contains('.')
    }

    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }

    /// Composite members have no getter and read as null.
    pub fn read(&self, row: &T) -> SqlValue {
        self.getter.as_ref().map_or(SqlValue::Null, |getter| getter(row))
    }

    pub fn setter(&self) -> Option<&Setter<T>> {
        self.setter.as_ref()
    }
}

/// The ordered descriptor table of a row type, sorted by member name so every resolution of
/// the same type yields the same order.
pub struct RowShape<T> {
    descriptors: Vec<RowDescriptor<T>>,
}

impl<T> fmt::Debug for RowShape<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.descriptors.iter()).finish()
    }
}

impl<T> RowShape<T> {
    pub fn builder() -> RowShapeBuilder<T> {
        RowShapeBuilder { descriptors: BTreeMap::new() }
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = RowDescriptor<T>>) -> Self {
        let mut builder = Self::builder();
        for descriptor in descriptors {
            builder = builder.descriptor(descriptor);
        }
        builder.build()
    }

    pub fn descriptors(&self) -> &[RowDescriptor<T>] {
        &self.descriptors
    }

    pub fn find(&self, name: &str) -> Option<&RowDescriptor<T>> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Members picked up by "add all columns": everything scalar, nested paths included.
    pub fn bulk_loadable(&self) -> impl Iterator<Item = &RowDescriptor<T>> {
        self.descriptors.iter().filter(|d| d.kind.is_bulk_loadable())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

pub struct RowShapeBuilder<T> {
    descriptors: BTreeMap<String, RowDescriptor<T>>,
}

impl<T: 'static> RowShapeBuilder<T> {
    /// Registers a readable and writable member. Re-registering a name replaces it.
    pub fn field<V, G, M>(self, name: impl Into<String>, get: G, get_mut: M) -> Self
    where
        V: ColumnValue + 'static,
        G: Fn(&T) -> &V + Send + Sync + 'static,
        M: Fn(&mut T) -> &mut V + Send + Sync + 'static,
    {
        let getter: Getter<T> = Arc::new(move |row: &T| get(row).to_sql_value());
        let setter: Setter<T> =
            Arc::new(move |row: &mut T, value: SqlValue| -> Result<(), ConversionError> {
                *get_mut(row) = V::from_sql_value(value)?;
                Ok(())
            });
        self.descriptor(RowDescriptor::new(name, V::KIND, V::NULLABLE, Some(getter), Some(setter)))
    }

    pub fn read_only<V, G>(self, name: impl Into<String>, get: G) -> Self
    where
        V: ColumnValue + 'static,
        G: Fn(&T) -> &V + Send + Sync + 'static,
    {
        let getter: Getter<T> = Arc::new(move |row: &T| get(row).to_sql_value());
        self.descriptor(RowDescriptor::new(name, V::KIND, V::NULLABLE, Some(getter), None))
    }

    pub fn composite(self, name: impl Into<String>) -> Self {
        self.descriptor(RowDescriptor::new(name, ValueKind::Composite, true, None, None))
    }
}

impl<T> RowShapeBuilder<T> {
    pub fn descriptor(mut self, descriptor: RowDescriptor<T>) -> Self {
        self.descriptors.insert(descriptor.name.clone(), descriptor);
        self
    }

    pub fn build(self) -> RowShape<T> {
        RowShape { descriptors: self.descriptors.into_values().collect() }
    }
}

/// Row types with a registered descriptor table. Implementations hand out the same cached
/// shape on every call, see [`bulk_entity!`](crate::bulk_entity).
pub trait BulkEntity: Sized + 'static {
    fn shape() -> Arc<RowShape<Self>>;
}

/// Registers a struct as a [`BulkEntity`]. `fields` lists readable and writable members,
/// nested members use a dotted path, `read_only` members can be loaded but never receive
/// generated keys and `composite` members are known but never bulk loaded.
///
/// ```ignore
/// bulk_entity!(Product {
///     fields: [id, sku, price, dimensions.width],
///     read_only: [created_by],
///     composite: [dimensions],
/// });
/// ```
#[macro_export]
macro_rules! bulk_entity {
    (
        $ty:ty {
            fields: [$($($field:ident).+),* $(,)?]
            $(, read_only: [$($($read_only:ident).+),* $(,)?])?
            $(, composite: [$($composite:ident),* $(,)?])?
            $(,)?
        }
    ) => {
        impl $crate::BulkEntity for $ty {
            fn shape() -> ::std::sync::Arc<$crate::RowShape<Self>> {
                static SHAPE: $crate::__private::Lazy<::std::sync::Arc<$crate::RowShape<$ty>>> =
                    $crate::__private::Lazy::new(|| {
                        let builder = $crate::RowShape::<$ty>::builder()
                            $(
                                .field(
                                    [$(stringify!($field)),+].join("."),
                                    |row| &row.$($field).+,
                                    |row| &mut row.$($field).+,
                                )
                            )*
                            $($(
                                .read_only(
                                    [$(stringify!($read_only)),+].join("."),
                                    |row| &row.$($read_only).+,
                                )
                            )*)?
                            $($(
                                .composite(stringify!($composite))
                            )*)?;
                        ::std::sync::Arc::new(builder.build())
                    });
                ::std::sync::Arc::clone(&SHAPE)
            }
        }
    };
}
