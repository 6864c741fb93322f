use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{quote, ToTokens};
use syn::{
    parse_macro_input, Attribute, Data, DeriveInput, Fields, GenericArgument, LitInt,
    PathArguments, Type,
};

mod rules;

use rules::Rule;

fn extract_error_type(attrs: &[Attribute]) -> TokenStream2 {
    for attr in attrs.iter().filter(|a| a.path().is_ident("validate_error")) {
        let mut ty = None;
        let parsed = attr.parse_nested_meta(|meta| {
            ty = Some(meta.path.to_token_stream());
            Ok(())
        });
        if let Err(err) = parsed {
            return err.to_compile_error();
        }
        if let Some(t) = ty {
            return t;
        }
    }
    quote! { String }
}

#[derive(Default)]
struct FieldRules {
    rules: Vec<Rule>,
    skip: bool,
}

fn extract_rules(attrs: &[Attribute]) -> syn::Result<FieldRules> {
    let mut out = FieldRules::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("validate")) {
        attr.parse_nested_meta(|meta| {
            let name = meta
                .path
                .get_ident()
                .map(|id| id.to_string())
                .ok_or_else(|| meta.error("expected a rule name"))?;
            if name == "skip" {
                out.skip = true;
                return Ok(());
            }
            let arg = if meta.input.peek(syn::Token![=]) {
                let lit: LitInt = meta.value()?.parse()?;
                Some(lit.base10_parse::<usize>()?)
            } else {
                None
            };
            let rule = Rule::parse(&name, arg).ok_or_else(|| {
                meta.error(format!("Unknown rule `{name}`"))
            })?;
            out.rules.push(rule);
            Ok(())
        })?;
    }
    Ok(out)
}

/// Shape of a field the rules can run against.
enum FieldShape {
    Plain,
    Optional,
}

fn is_string_path(ty: &Type) -> bool {
    match ty {
        Type::Path(p) => p
            .path
            .segments
            .last()
            .map(|s| s.ident == "String")
            .unwrap_or(false),
        _ => false,
    }
}

/// Rules apply to `String` and `Option<String>` fields only.
fn field_shape(ty: &Type) -> Option<FieldShape> {
    if is_string_path(ty) {
        return Some(FieldShape::Plain);
    }
    let Type::Path(p) = ty else {
        return None;
    };
    let segment = p.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first() {
        Some(GenericArgument::Type(inner)) if is_string_path(inner) => Some(FieldShape::Optional),
        _ => None,
    }
}

#[proc_macro_derive(Validate, attributes(validate, validate_error))]
pub fn derive_validate(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let struct_name = ast.ident;
    let error_type = extract_error_type(&ast.attrs);
    let struct_rules = match extract_rules(&ast.attrs) {
        Ok(parsed) => parsed.rules,
        Err(err) => return err.to_compile_error().into(),
    };

    let mut ctor_params = vec![];
    let mut ctor_assigns = vec![];
    let mut validations = vec![];

    let fields = match ast.data {
        Data::Struct(s) => match s.fields {
            Fields::Named(n) => n.named,
            _ => return quote! { compile_error!("Validate supports named structs only"); }.into(),
        },
        _ => return quote! { compile_error!("Validate can only be used on structs"); }.into(),
    };

    for field in fields {
        let Some(ident) = field.ident else {
            continue;
        };
        let ty = field.ty;

        ctor_params.push(quote! { #ident: #ty });
        ctor_assigns.push(quote! { #ident });

        let parsed = match extract_rules(&field.attrs) {
            Ok(parsed) => parsed,
            Err(err) => return err.to_compile_error().into(),
        };
        if parsed.skip {
            continue;
        }
        let mut field_rules = parsed.rules;
        if field_rules.is_empty() {
            field_rules = struct_rules.clone();
        }
        if field_rules.is_empty() {
            continue;
        }

        let Some(shape) = field_shape(&ty) else {
            let msg = format!(
                "Validation rules can only be applied to String or Option<String> fields: {}",
                ident
            );
            return quote! { compile_error!(#msg); }.into();
        };

        let label = ident.to_string();
        let checks: Vec<TokenStream2> = field_rules
            .iter()
            .map(|rule| rule.expand(&quote! { value }, &label))
            .collect();
        let block = match shape {
            FieldShape::Plain => quote! {
                {
                    let value: &str = self.#ident.as_str();
                    #(#checks)*
                }
            },
            FieldShape::Optional => quote! {
                if let Some(value) = self.#ident.as_deref() {
                    #(#checks)*
                }
            },
        };
        validations.push(block);
    }

    let out = quote! {
        impl #struct_name {
            #[allow(clippy::too_many_arguments)]
            pub fn new(
                #(#ctor_params),*
            ) -> Result<Self, #error_type> {
                let candidate = Self {
                    #(#ctor_assigns),*
                };
                candidate.validate()?;
                Ok(candidate)
            }

            /// Checks every declared field rule, failing on the first violation.
            pub fn validate(&self) -> Result<(), #error_type> {
                #[allow(dead_code)]
                type E = #error_type;

                #(
                    #validations
                )*

                Ok(())
            }
        }
    };

    out.into()
}
