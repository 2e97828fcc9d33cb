//! # ZANJ Derive Macros
//!
//! This crate provides `#[derive(SerializableDataclass)]` for `zanj`. It
//! generates the serializer view, the record traits, typed loading, structural
//! equality and the loader registration of a struct with named fields.
//!
//! Compatible with `syn 2.0`.

use proc_macro::TokenStream;
use quote::{ToTokens, format_ident, quote};
use syn::meta::ParseNestedMeta;
use syn::{Attribute, Data, DeriveInput, Expr, Fields, Ident, LitBool, LitStr, Token, Type, parse_macro_input};

/// Derives `Serializable`, `SerializableRecord`, `SerializableDataclass`,
/// `Loadable`, `DeepEq` and (unless preserved) `PartialEq`.
///
/// Struct attributes, inside `#[sdc(...)]`:
/// - `properties(a, b)`: `&self` methods serialized after the fields.
/// - `methods_no_override(serialize, load, eq, validate_fields_types)`: keep the
///   user-written inherent method instead of generating one.
/// - `on_typecheck_mismatch = "warn"`, `on_typecheck_error = "raise"`.
///
/// Field attributes: `serialize`, `init`, `default`, `default = "expr"`,
/// `serialization_fn`, `deserialize_fn`, `loading_fn`, `assert_type`,
/// `compare`, `repr`, `flatten`.
#[proc_macro_derive(SerializableDataclass, attributes(sdc))]
pub fn derive_serializable_dataclass(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

// --- Parsed attributes ---

#[derive(Default)]
struct RecordOpts {
    properties: Vec<Ident>,
    keep_serialize: bool,
    keep_load: bool,
    keep_eq: bool,
    keep_validate: bool,
    on_mismatch: Option<Ident>,
    on_error: Option<Ident>,
}

enum DefaultValue {
    Trait,
    Expr(Expr),
}

struct FieldSpec {
    ident: Ident,
    ty: Type,
    serialize: bool,
    init: bool,
    default: Option<DefaultValue>,
    serialization_fn: Option<Expr>,
    deserialize_fn: Option<Expr>,
    loading_fn: Option<Expr>,
    assert_type: bool,
    compare: bool,
    repr: bool,
    flatten: bool,
}

impl FieldSpec {
    fn name(&self) -> String {
        self.ident.to_string()
    }

    /// Serialized through the ambient serializer.
    fn walks(&self) -> bool {
        self.serialize && !self.flatten && self.serialization_fn.is_none()
    }

    fn custom_load(&self) -> bool {
        self.deserialize_fn.is_some() || self.loading_fn.is_some()
    }

    fn default_expr(&self) -> Option<proc_macro2::TokenStream> {
        self.default.as_ref().map(|d| match d {
            DefaultValue::Trait => quote! { ::core::default::Default::default() },
            DefaultValue::Expr(e) => quote! { #e },
        })
    }
}

fn parse_flag(meta: &ParseNestedMeta<'_>) -> syn::Result<bool> {
    if meta.input.peek(Token![=]) {
        let lit: LitBool = meta.value()?.parse()?;
        Ok(lit.value)
    } else {
        Ok(true)
    }
}

fn parse_expr(meta: &ParseNestedMeta<'_>) -> syn::Result<Expr> {
    let s: LitStr = meta.value()?.parse()?;
    s.parse()
}

fn parse_error_mode(meta: &ParseNestedMeta<'_>) -> syn::Result<Ident> {
    let s: LitStr = meta.value()?.parse()?;
    let variant = match s.value().to_lowercase().as_str() {
        "raise" | "except" => "Raise",
        "warn" => "Warn",
        "ignore" => "Ignore",
        _ => return Err(meta.error("Unknown error mode. Supported: raise, warn, ignore")),
    };
    Ok(Ident::new(variant, s.span()))
}

fn parse_record_attributes(attrs: &[Attribute]) -> syn::Result<RecordOpts> {
    let mut opts = RecordOpts::default();
    for attr in attrs {
        if !attr.path().is_ident("sdc") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("properties") {
                return meta.parse_nested_meta(|prop| {
                    let ident = prop
                        .path
                        .get_ident()
                        .cloned()
                        .ok_or_else(|| prop.error("property must be a method name"))?;
                    opts.properties.push(ident);
                    Ok(())
                });
            }
            if meta.path.is_ident("methods_no_override") {
                return meta.parse_nested_meta(|method| {
                    if method.path.is_ident("serialize") {
                        opts.keep_serialize = true;
                    } else if method.path.is_ident("load") {
                        opts.keep_load = true;
                    } else if method.path.is_ident("eq") {
                        opts.keep_eq = true;
                    } else if method.path.is_ident("validate_fields_types") {
                        opts.keep_validate = true;
                    } else {
                        return Err(method.error(
                            "Unknown method. Supported: serialize, load, eq, validate_fields_types",
                        ));
                    }
                    Ok(())
                });
            }
            if meta.path.is_ident("on_typecheck_mismatch") {
                opts.on_mismatch = Some(parse_error_mode(&meta)?);
                return Ok(());
            }
            if meta.path.is_ident("on_typecheck_error") {
                opts.on_error = Some(parse_error_mode(&meta)?);
                return Ok(());
            }
            Err(meta.error(
                "Unknown sdc attribute key. Supported: properties, methods_no_override, \
                 on_typecheck_mismatch, on_typecheck_error",
            ))
        })?;
    }
    Ok(opts)
}

fn parse_field(field: &syn::Field) -> syn::Result<FieldSpec> {
    let ident = field
        .ident
        .clone()
        .ok_or_else(|| syn::Error::new_spanned(field, "SerializableDataclass needs named fields"))?;
    let mut spec = FieldSpec {
        ident,
        ty: field.ty.clone(),
        serialize: true,
        init: true,
        default: None,
        serialization_fn: None,
        deserialize_fn: None,
        loading_fn: None,
        assert_type: true,
        compare: true,
        repr: true,
        flatten: false,
    };

    for attr in &field.attrs {
        if !attr.path().is_ident("sdc") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            let key = meta
                .path
                .get_ident()
                .map(ToString::to_string)
                .unwrap_or_default();
            match key.as_str() {
                "serialize" => spec.serialize = parse_flag(&meta)?,
                "init" => spec.init = parse_flag(&meta)?,
                "assert_type" => spec.assert_type = parse_flag(&meta)?,
                "compare" => spec.compare = parse_flag(&meta)?,
                "repr" => spec.repr = parse_flag(&meta)?,
                "flatten" => spec.flatten = parse_flag(&meta)?,
                "default" => {
                    spec.default = Some(if meta.input.peek(Token![=]) {
                        DefaultValue::Expr(parse_expr(&meta)?)
                    } else {
                        DefaultValue::Trait
                    });
                }
                "serialization_fn" => spec.serialization_fn = Some(parse_expr(&meta)?),
                "deserialize_fn" => spec.deserialize_fn = Some(parse_expr(&meta)?),
                "loading_fn" => spec.loading_fn = Some(parse_expr(&meta)?),
                _ => {
                    return Err(meta.error(
                        "Unknown sdc field key. Supported: serialize, init, default, \
                         serialization_fn, deserialize_fn, loading_fn, assert_type, compare, repr, flatten",
                    ));
                }
            }
            Ok(())
        })?;
    }

    if spec.init && !spec.serialize {
        return Err(syn::Error::new(
            spec.ident.span(),
            "a field with `init = true` must be serialized; set `init = false` with a default",
        ));
    }
    if !spec.init && spec.default.is_none() {
        return Err(syn::Error::new(
            spec.ident.span(),
            "a field with `init = false` needs `default`",
        ));
    }
    if spec.flatten && (spec.serialization_fn.is_some() || spec.custom_load() || !spec.init) {
        return Err(syn::Error::new(
            spec.ident.span(),
            "`flatten` cannot be combined with custom functions or `init = false`",
        ));
    }
    Ok(spec)
}

/// `Vec < Option < i32 > >` -> `Vec<Option<i32>>`.
fn type_string(ty: &Type) -> String {
    let raw = ty.to_token_stream().to_string();
    let tight = |c: char| "<>,:&()[];".contains(c);
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == ' ' {
            let prev = i.checked_sub(1).map(|j| chars[j]);
            let next = chars.get(i + 1).copied();
            let keep_after_comma = prev == Some(',');
            if !keep_after_comma && (prev.is_some_and(tight) || next.is_some_and(tight)) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

// --- Expansion ---

fn expand(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = input.ident.clone();

    let data_struct = match input.data {
        Data::Struct(ds) => ds,
        _ => {
            return Err(syn::Error::new(
                name.span(),
                "SerializableDataclass only supports structs",
            ));
        }
    };
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            name.span(),
            "SerializableDataclass does not support generic structs",
        ));
    }
    let Fields::Named(named) = data_struct.fields else {
        return Err(syn::Error::new(
            name.span(),
            "SerializableDataclass only supports structs with named fields",
        ));
    };

    let opts = parse_record_attributes(&input.attrs)?;
    let fields = named
        .named
        .iter()
        .map(parse_field)
        .collect::<syn::Result<Vec<_>>>()?;

    let tag = format!("{name}(SerializableDataclass)");

    let impl_serializable = generate_serializable(&name, &fields);
    let impl_record = generate_record(&name, &tag, &fields, &opts);
    let impl_dataclass = generate_dataclass(&name, &tag, &fields, &opts);
    let impl_loadable = generate_loadable(&name, &tag);
    let impl_eq = generate_equality(&name, &fields, &opts);

    Ok(quote! {
        #impl_serializable
        #impl_record
        #impl_dataclass
        #impl_loadable
        #impl_eq
    })
}

// --- Generator: Serializable ---

fn generate_serializable(name: &Ident, fields: &[FieldSpec]) -> proc_macro2::TokenStream {
    let type_name = name.to_string();
    let parts = fields.iter().filter(|f| f.repr).map(|f| {
        let ident = &f.ident;
        let label = format!("{}={{:?}}", f.name());
        quote! { format!(#label, &self.#ident) }
    });

    quote! {
        impl ::zanj::Serializable for #name {
            fn describe(&self) -> ::zanj::ValueKind<'_> {
                ::zanj::ValueKind::Record(self)
            }

            fn type_name(&self) -> &'static str {
                #type_name
            }

            fn repr(&self) -> ::std::string::String {
                let parts: ::std::vec::Vec<::std::string::String> = ::std::vec![#(#parts),*];
                format!("{}({})", #type_name, parts.join(", "))
            }
        }
    }
}

// --- Generator: SerializableRecord ---

fn generate_record(
    name: &Ident,
    tag: &str,
    fields: &[FieldSpec],
    opts: &RecordOpts,
) -> proc_macro2::TokenStream {
    let serialize_body = if opts.keep_serialize {
        quote! { #name::serialize(self) }
    } else {
        let field_steps = fields.iter().filter(|f| f.serialize).map(|f| {
            let ident = &f.ident;
            let key = f.name();
            if f.flatten {
                quote! { ::zanj::rt::flatten_into(&mut out, serializer, path, &self.#ident)?; }
            } else if let Some(func) = &f.serialization_fn {
                quote! { out.insert(#key.to_owned(), (#func)(&self.#ident)); }
            } else {
                quote! { ::zanj::rt::serialize_field(&mut out, serializer, path, #key, &self.#ident)?; }
            }
        });
        let property_steps = opts.properties.iter().map(|p| {
            let key = p.to_string();
            quote! { ::zanj::rt::serialize_field(&mut out, serializer, path, #key, &self.#p())?; }
        });
        quote! {
            let mut out = ::zanj::JsonMap::new();
            out.insert(
                ::zanj::FORMAT_KEY.to_owned(),
                ::zanj::JsonValue::String(#tag.to_owned()),
            );
            #(#field_steps)*
            #(#property_steps)*
            Ok(::zanj::JsonValue::Object(out))
        }
    };

    let direct_values = fields.iter().filter(|f| f.walks()).map(|f| {
        let ident = &f.ident;
        let key = f.name();
        quote! { #key => Some(&self.#ident as &dyn ::zanj::Serializable), }
    });
    let flattened_values = fields.iter().filter(|f| f.flatten).map(|f| {
        let ident = &f.ident;
        quote! { .or_else(|| ::zanj::SerializableRecord::field_value(&self.#ident, name)) }
    });

    let diff_steps = fields.iter().filter(|f| f.compare).map(|f| {
        let ident = &f.ident;
        let key = f.name();
        if f.flatten {
            quote! {
                if let ::zanj::JsonValue::Object(inner) =
                    ::zanj::SerializableRecord::diff_dyn(&self.#ident, &other.#ident, false)?
                {
                    out.extend(inner);
                }
            }
        } else if f.walks() {
            quote! { ::zanj::rt::field_diff(&mut out, #key, &self.#ident, &other.#ident)?; }
        } else {
            quote! { ::zanj::rt::field_diff_debug(&mut out, #key, &self.#ident, &other.#ident); }
        }
    });

    let check_body = if opts.keep_validate {
        quote! {
            if #name::validate_fields_types(self) {
                Ok(())
            } else {
                Err(::zanj::ZanjError::type_error(#tag, "validate_fields_types returned false"))
            }
        }
    } else {
        let steps = fields.iter().map(|f| {
            let ident = &f.ident;
            let qualname = format!("{name}.{}", f.name());
            if f.flatten {
                quote! { ::zanj::SerializableRecord::check_field_types(&self.#ident)?; }
            } else if f.assert_type && f.walks() && !f.custom_load() {
                quote! { ::zanj::rt::check_field_type(&self.#ident, #qualname)?; }
            } else {
                quote! {}
            }
        });
        quote! {
            #(#steps)*
            Ok(())
        }
    };

    quote! {
        impl ::zanj::SerializableRecord for #name {
            fn format_tag(&self) -> &'static str {
                <Self as ::zanj::SerializableDataclass>::FORMAT_TAG
            }

            fn fields(&self) -> &'static [::zanj::FieldInfo] {
                <Self as ::zanj::SerializableDataclass>::FIELDS
            }

            fn properties(&self) -> &'static [&'static str] {
                <Self as ::zanj::SerializableDataclass>::PROPERTIES
            }

            fn field_value(&self, name: &str) -> ::core::option::Option<&dyn ::zanj::Serializable> {
                let direct: ::core::option::Option<&dyn ::zanj::Serializable> = match name {
                    #(#direct_values)*
                    _ => None,
                };
                direct #(#flattened_values)*
            }

            fn serialize_record(
                &self,
                serializer: &::zanj::JsonSerializer,
                path: &::zanj::ObjectPath,
            ) -> ::zanj::Result<::zanj::JsonValue> {
                <Self as ::zanj::SerializableDataclass>::ensure_registered();
                let _ = (serializer, path);
                #serialize_body
            }

            fn dyn_eq(&self, other: &dyn ::zanj::SerializableRecord) -> bool {
                ::zanj::AsAny::as_any(other)
                    .downcast_ref::<Self>()
                    .is_some_and(|other| ::zanj::DeepEq::deep_eq(self, other))
            }

            fn diff_dyn(
                &self,
                other: &dyn ::zanj::SerializableRecord,
                of_serialized: bool,
            ) -> ::zanj::Result<::zanj::JsonValue> {
                let Some(other) = ::zanj::AsAny::as_any(other).downcast_ref::<Self>() else {
                    return Err(::zanj::rt::diff_type_mismatch(#tag, other));
                };
                if of_serialized {
                    let serializer = ::zanj::JsonSerializer::default();
                    let root = ::zanj::ObjectPath::root();
                    return Ok(::zanj::rt::serialized_diff(
                        &::zanj::SerializableRecord::serialize_record(self, &serializer, &root)?,
                        &::zanj::SerializableRecord::serialize_record(other, &serializer, &root)?,
                    ));
                }
                let mut out = ::zanj::JsonMap::new();
                #(#diff_steps)*
                Ok(::zanj::JsonValue::Object(out))
            }

            fn check_field_types(&self) -> ::zanj::Result<()> {
                #check_body
            }
        }
    }
}

// --- Generator: SerializableDataclass ---

fn generate_dataclass(
    name: &Ident,
    tag: &str,
    fields: &[FieldSpec],
    opts: &RecordOpts,
) -> proc_macro2::TokenStream {
    let on_mismatch = opts
        .on_mismatch
        .clone()
        .unwrap_or_else(|| format_ident!("Warn"));
    let on_error = opts.on_error.clone().unwrap_or_else(|| format_ident!("Raise"));

    let field_infos = fields.iter().map(|f| {
        let key = f.name();
        let type_name = type_string(&f.ty);
        let serialize = f.serialize;
        let init = f.init;
        let has_default = f.default.is_some();
        let assert_type = f.assert_type;
        let compare = f.compare;
        let repr = f.repr;
        let flatten = f.flatten;
        let has_serialization_fn = f.serialization_fn.is_some();
        let has_deserialize_fn = f.deserialize_fn.is_some();
        let has_loading_fn = f.loading_fn.is_some();
        quote! {
            ::zanj::FieldInfo {
                name: #key,
                type_name: #type_name,
                serialize: #serialize,
                init: #init,
                has_default: #has_default,
                assert_type: #assert_type,
                compare: #compare,
                repr: #repr,
                flatten: #flatten,
                has_serialization_fn: #has_serialization_fn,
                has_deserialize_fn: #has_deserialize_fn,
                has_loading_fn: #has_loading_fn,
            }
        }
    });
    let property_names = opts.properties.iter().map(ToString::to_string);

    // Locals carry a prefix so that fields named like the parameters do not shadow them.
    let local = |f: &FieldSpec| format_ident!("__sdc_{}", f.ident);

    let load_steps = fields.iter().map(|f| {
        let var = local(f);
        let ty = &f.ty;
        let key = f.name();
        let qualname = format!("{name}.{key}");

        if f.flatten {
            return quote! {
                let #var: #ty = <#ty as ::zanj::SerializableDataclass>::load_fields(map, loader, path)?;
            };
        }
        if !f.init {
            let default = f.default_expr();
            return quote! { let #var: #ty = #default; };
        }

        let when_missing = match f.default_expr() {
            Some(default) => quote! { #default },
            None => quote! { return Err(::zanj::rt::missing_field(#qualname, path)) },
        };
        let deserialize_arm = f.deserialize_fn.as_ref().map(|func| {
            quote! {
                Some(value) => (#func)(value).map_err(|e| ::zanj::rt::field_fn_error(#qualname, e))?,
            }
        });
        let fallback_arms = match &f.loading_fn {
            Some(func) => quote! {
                _ => (#func)(map).map_err(|e| ::zanj::rt::field_fn_error(#qualname, e))?,
            },
            None if f.deserialize_fn.is_some() => quote! {
                None => #when_missing,
            },
            None => {
                let assert_type = f.assert_type;
                quote! {
                    Some(value) => ::zanj::rt::load_field::<#ty>(
                        value,
                        loader,
                        &path.child(#key),
                        ::zanj::rt::FieldCheck {
                            qualname: #qualname,
                            assert_type: #assert_type,
                            on_mismatch: ::zanj::ErrorMode::#on_mismatch,
                            on_error: ::zanj::ErrorMode::#on_error,
                        },
                    )?,
                    None => #when_missing,
                }
            }
        };
        quote! {
            let #var: #ty = match map.get(#key) {
                #deserialize_arm
                #fallback_arms
            };
        }
    });
    let constructor = fields.iter().map(|f| {
        let ident = &f.ident;
        let var = local(f);
        quote! { #ident: #var }
    });

    let payload_body = if opts.keep_load {
        quote! {
            let _ = (loader, path);
            #name::load(node)
        }
    } else {
        quote! {
            let map = ::zanj::rt::record_map(node, #tag, path)?;
            <Self as ::zanj::SerializableDataclass>::load_fields(map, loader, path)
        }
    };

    let update_arms = fields.iter().filter(|f| f.init && !f.flatten).map(|f| {
        let ident = &f.ident;
        let ty = &f.ty;
        let key = f.name();
        let qualname = format!("{name}.{key}");
        let apply = if let Some(func) = &f.deserialize_fn {
            quote! {
                self.#ident = (#func)(value).map_err(|e| ::zanj::rt::field_fn_error(#qualname, e))?;
            }
        } else if let Some(func) = &f.loading_fn {
            quote! {
                let mut single = ::zanj::JsonMap::new();
                single.insert(#key.to_owned(), value.clone());
                self.#ident = (#func)(&single).map_err(|e| ::zanj::rt::field_fn_error(#qualname, e))?;
            }
        } else {
            quote! {
                <#ty as ::zanj::Loadable>::update_from(&mut self.#ident, value, loader, path)?;
            }
        };
        quote! {
            #key => {
                #apply
                Ok(true)
            }
        }
    });
    let update_flattened = fields.iter().filter(|f| f.flatten).map(|f| {
        let ident = &f.ident;
        let ty = &f.ty;
        quote! {
            if <#ty as ::zanj::SerializableDataclass>::update_field(&mut self.#ident, name, value, loader, path)? {
                return Ok(true);
            }
        }
    });

    quote! {
        impl ::zanj::SerializableDataclass for #name {
            const FORMAT_TAG: &'static str = #tag;

            const FIELDS: &'static [::zanj::FieldInfo] = &[#(#field_infos),*];

            const PROPERTIES: &'static [&'static str] = &[#(#property_names),*];

            fn load_fields(
                map: &::zanj::JsonMap,
                loader: &::zanj::JsonLoader<'_>,
                path: &::zanj::ObjectPath,
            ) -> ::zanj::Result<Self> {
                let _ = (map, loader, path);
                #(#load_steps)*
                Ok(Self { #(#constructor),* })
            }

            fn load_payload(
                node: &::zanj::JsonValue,
                loader: &::zanj::JsonLoader<'_>,
                path: &::zanj::ObjectPath,
            ) -> ::zanj::Result<Self> {
                <Self as ::zanj::SerializableDataclass>::ensure_registered();
                #payload_body
            }

            fn update_field(
                &mut self,
                name: &str,
                value: &::zanj::JsonValue,
                loader: &::zanj::JsonLoader<'_>,
                path: &::zanj::ObjectPath,
            ) -> ::zanj::Result<bool> {
                let _ = (value, loader, path);
                match name {
                    #(#update_arms)*
                    _ => {
                        #(#update_flattened)*
                        Ok(false)
                    }
                }
            }

            fn ensure_registered() {
                static REGISTERED: ::std::sync::Once = ::std::sync::Once::new();
                REGISTERED.call_once(::zanj::rt::register_record_loader::<Self>);
            }
        }
    }
}

// --- Generator: Loadable ---

fn generate_loadable(name: &Ident, tag: &str) -> proc_macro2::TokenStream {
    quote! {
        ::zanj::rt::inventory::submit! {
            ::zanj::rt::RecordRegistration {
                handler: ::zanj::rt::record_loader_handler::<#name>,
            }
        }

        impl ::zanj::Loadable for #name {
            fn load_json(
                node: &::zanj::JsonValue,
                loader: &::zanj::JsonLoader<'_>,
                path: &::zanj::ObjectPath,
            ) -> ::zanj::Result<Self> {
                <Self as ::zanj::SerializableDataclass>::load_payload(node, loader, path)
            }

            fn type_expr() -> ::zanj::TypeExpr {
                ::zanj::TypeExpr::Record(#tag)
            }

            fn update_from(
                &mut self,
                node: &::zanj::JsonValue,
                loader: &::zanj::JsonLoader<'_>,
                path: &::zanj::ObjectPath,
            ) -> ::zanj::Result<()> {
                <Self as ::zanj::SerializableDataclass>::update_from_nested_with(self, node, loader, path)
            }
        }
    }
}

// --- Generator: DeepEq / PartialEq ---

fn generate_equality(name: &Ident, fields: &[FieldSpec], opts: &RecordOpts) -> proc_macro2::TokenStream {
    if opts.keep_eq {
        return quote! {
            impl ::zanj::DeepEq for #name {
                fn deep_eq(&self, other: &Self) -> bool {
                    self == other
                }
            }
        };
    }

    let compared = fields.iter().filter(|f| f.compare).map(|f| {
        let ident = &f.ident;
        quote! { && ::zanj::DeepEq::deep_eq(&self.#ident, &other.#ident) }
    });

    quote! {
        impl ::zanj::DeepEq for #name {
            fn deep_eq(&self, other: &Self) -> bool {
                true #(#compared)*
            }
        }

        impl ::core::cmp::PartialEq for #name {
            fn eq(&self, other: &Self) -> bool {
                ::zanj::DeepEq::deep_eq(self, other)
            }
        }
    }
}
