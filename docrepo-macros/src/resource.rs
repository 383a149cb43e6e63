use proc_macro2::{TokenStream, TokenTree};
use quote::{ToTokens, quote};
use syn::{
    Data, DeriveInput, Error, Field, Fields, GenericArgument, LitStr, PathArguments, Token, Type,
    ext::IdentExt, meta::ParseNestedMeta,
};

// derive_resource
pub fn derive_resource(input: TokenStream) -> TokenStream {
    match expand(input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error(),
    }
}

fn expand(input: TokenStream) -> syn::Result<TokenStream> {
    let input: DeriveInput = syn::parse2(input)?;
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            other => {
                return Err(Error::new_spanned(
                    other,
                    "Resource can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(Error::new_spanned(
                ident,
                "Resource can only be derived for structs with named fields",
            ));
        }
    };

    let type_name = container_name(&input)?.unwrap_or_else(|| camel_case(&ident.unraw().to_string()));

    let mut identity = None;
    let mut attributes = Vec::new();
    let mut relationships = Vec::new();

    for field in fields {
        let Some(options) = FieldOptions::parse(field)? else {
            continue;
        };
        let Some(field_ident) = field.ident.as_ref() else {
            return Err(Error::new_spanned(field, "expected a named field"));
        };

        let field_name = field_ident.unraw().to_string();
        let property = serde_rename(field)?.unwrap_or_else(|| field_name.clone());
        let public = options
            .name
            .unwrap_or_else(|| camel_case(&field_name));

        match options.role {
            Role::Identity => {
                if identity.is_some() {
                    return Err(Error::new_spanned(
                        field,
                        "only one field can be marked #[resource(id)]",
                    ));
                }
                let kind = options.kind.unwrap_or_else(|| Kind::infer(&field.ty));
                identity = Some(quote! {
                    ::docrepo::resource::AttrAttribute::new(#public, #property, #kind)
                });
            }
            Role::Attribute => {
                let kind = options.kind.unwrap_or_else(|| Kind::infer(&field.ty));
                attributes.push(quote! {
                    .attribute(::docrepo::resource::AttrAttribute::new(#public, #property, #kind))
                });
            }
            Role::Relationship { right_type, to_many } => {
                let kind = match to_many {
                    true => quote!(::docrepo::resource::RelationshipKind::ToMany),
                    false => quote!(::docrepo::resource::RelationshipKind::ToOne),
                };
                relationships.push(quote! {
                    .relationship(::docrepo::resource::RelationshipAttribute::new(
                        #public,
                        #property,
                        #right_type,
                        #kind,
                    ))
                });
            }
        }
    }

    let Some(identity) = identity else {
        return Err(Error::new_spanned(
            ident,
            "a resource needs one field marked #[resource(id)]",
        ));
    };

    Ok(quote! {
        impl #impl_generics ::docrepo::resource::Resource for #ident #ty_generics #where_clause {
            fn resource_type() -> ::docrepo::resource::ResourceType {
                ::docrepo::resource::ResourceType::builder(#type_name, #identity)
                    #(#attributes)*
                    #(#relationships)*
                    .build()
            }
        }
    })
}

///
/// Role
///

enum Role {
    Identity,
    Attribute,
    Relationship { right_type: String, to_many: bool },
}

///
/// FieldOptions
///

struct FieldOptions {
    role: Role,
    name: Option<String>,
    kind: Option<Kind>,
}

impl FieldOptions {
    /// Reads the `#[resource(...)]` attributes of a field. Fields without a role are skipped.
    fn parse(field: &Field) -> syn::Result<Option<Self>> {
        let mut role = None;
        let mut name = None;
        let mut kind = None;

        for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("resource")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    set_role(&mut role, Role::Identity, &meta)
                } else if meta.path.is_ident("attr") {
                    set_role(&mut role, Role::Attribute, &meta)
                } else if meta.path.is_ident("has_one") || meta.path.is_ident("has_many") {
                    let to_many = meta.path.is_ident("has_many");
                    let right_type: LitStr = meta.value()?.parse()?;
                    set_role(
                        &mut role,
                        Role::Relationship { right_type: right_type.value(), to_many },
                        &meta,
                    )
                } else if meta.path.is_ident("name") {
                    let value: LitStr = meta.value()?.parse()?;
                    name = Some(value.value());
                    Ok(())
                } else if meta.path.is_ident("kind") {
                    let value: LitStr = meta.value()?.parse()?;
                    kind = Some(Kind::parse(&value)?);
                    Ok(())
                } else {
                    Err(meta.error("expected one of `id`, `attr`, `has_one`, `has_many`, `name` or `kind`"))
                }
            })?;
        }

        match role {
            Some(role) => Ok(Some(FieldOptions { role, name, kind })),
            None if name.is_some() || kind.is_some() => Err(Error::new_spanned(
                field,
                "`name` and `kind` need one of `id`, `attr`, `has_one` or `has_many`",
            )),
            None => Ok(None),
        }
    }
}

fn set_role(slot: &mut Option<Role>, role: Role, meta: &ParseNestedMeta) -> syn::Result<()> {
    if slot.is_some() {
        return Err(meta.error("a field can only be one of `id`, `attr`, `has_one` or `has_many`"));
    }

    *slot = Some(role);
    Ok(())
}

///
/// Kind
///

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    String,
    Boolean,
    Number,
    DateTime,
    Uuid,
    Enum,
    Other,
}

impl Kind {
    fn parse(value: &LitStr) -> syn::Result<Self> {
        match value.value().as_str() {
            "string" => Ok(Kind::String),
            "boolean" => Ok(Kind::Boolean),
            "number" => Ok(Kind::Number),
            "datetime" => Ok(Kind::DateTime),
            "uuid" => Ok(Kind::Uuid),
            "enum" => Ok(Kind::Enum),
            "other" => Ok(Kind::Other),
            _ => Err(Error::new_spanned(
                value,
                "expected one of \"string\", \"boolean\", \"number\", \"datetime\", \"uuid\", \"enum\" or \"other\"",
            )),
        }
    }

    /// Infers the kind from the field type, looking through `Option`.
    fn infer(ty: &Type) -> Self {
        let ty = option_inner(ty).unwrap_or(ty);

        let ident = match ty {
            Type::Reference(reference) => return Kind::infer(&reference.elem),
            Type::Path(path) => match path.path.segments.last() {
                Some(segment) => segment.ident.to_string(),
                None => return Kind::Other,
            },
            _ => return Kind::Other,
        };

        match ident.as_str() {
            "String" | "str" | "char" => Kind::String,
            "bool" => Kind::Boolean,
            "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64"
            | "u128" | "usize" | "f32" | "f64" | "Decimal128" => Kind::Number,
            "DateTime" | "NaiveDateTime" | "NaiveDate" => Kind::DateTime,
            "Uuid" => Kind::Uuid,
            _ => Kind::Other,
        }
    }
}

impl ToTokens for Kind {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        let variant = match self {
            Kind::String => quote!(String),
            Kind::Boolean => quote!(Boolean),
            Kind::Number => quote!(Number),
            Kind::DateTime => quote!(DateTime),
            Kind::Uuid => quote!(Uuid),
            Kind::Enum => quote!(Enum),
            Kind::Other => quote!(Other),
        };

        tokens.extend(quote!(::docrepo::resource::ValueKind::#variant));
    }
}

fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };

    args.args.iter().find_map(|arg| match arg {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    })
}

fn container_name(input: &DeriveInput) -> syn::Result<Option<String>> {
    let mut name = None;

    for attr in input.attrs.iter().filter(|attr| attr.path().is_ident("resource")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                name = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("expected `name`"))
            }
        })?;
    }

    Ok(name)
}

/// The `#[serde(rename = "...")]` of a field, skipping every other serde option.
fn serde_rename(field: &Field) -> syn::Result<Option<String>> {
    let mut rename = None;

    for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.input.peek(Token![=]) {
                let value = meta.value()?;
                if meta.path.is_ident("rename") {
                    let lit: LitStr = value.parse()?;
                    rename = Some(lit.value());
                } else {
                    value.parse::<syn::Expr>()?;
                }
            } else if meta.input.peek(syn::token::Paren) {
                meta.input.parse::<TokenTree>()?;
            }
            Ok(())
        })?;
    }

    Ok(rename)
}

fn camel_case(name: &str) -> String {
    let mut camel = String::with_capacity(name.len());

    for (index, part) in name.split('_').filter(|part| !part.is_empty()).enumerate() {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            match index {
                0 => camel.extend(first.to_lowercase()),
                _ => camel.extend(first.to_uppercase()),
            }
            camel.push_str(chars.as_str());
        }
    }

    camel
}

#[cfg(test)]
mod tests {
    use syn::parse_quote;

    use super::*;

    #[test]
    fn camel_case_of_field_and_type_names() {
        assert_eq!(camel_case("published_at"), "publishedAt");
        assert_eq!(camel_case("caption"), "caption");
        assert_eq!(camel_case("BookShelf"), "bookShelf");
    }

    #[test]
    fn kinds_are_inferred_through_option() {
        assert_eq!(Kind::infer(&parse_quote!(String)), Kind::String);
        assert_eq!(Kind::infer(&parse_quote!(Option<i64>)), Kind::Number);
        assert_eq!(Kind::infer(&parse_quote!(Option<chrono::DateTime<chrono::Utc>>)), Kind::DateTime);
        assert_eq!(Kind::infer(&parse_quote!(&'static str)), Kind::String);
        assert_eq!(Kind::infer(&parse_quote!(Vec<String>)), Kind::Other);
    }

    #[test]
    fn missing_identity_is_a_compile_error() {
        let input = quote! {
            #[resource(name = "books")]
            struct Book {
                #[resource(attr)]
                caption: String,
            }
        };

        let output = derive_resource(input).to_string();
        assert!(output.contains("compile_error"));
    }

    #[test]
    fn serde_rename_becomes_the_property_name() {
        let input = quote! {
            struct Book {
                #[resource(id)]
                id: String,
                #[serde(default, rename = "title", skip_serializing_if = "Option::is_none")]
                #[resource(attr, name = "caption")]
                caption: Option<String>,
            }
        };

        let output = derive_resource(input).to_string().replace(' ', "");
        assert!(output.contains("\"caption\",\"title\""));
        assert!(output.contains("builder(\"book\""));
    }
}
