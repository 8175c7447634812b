use convert_case::{Case, Casing};
use itertools::Itertools;
use proc_macro::TokenStream;
use proc_macro_crate::{crate_name, FoundCrate};
use quote::{format_ident, quote};
use syn::{
  braced, bracketed, parenthesized, parse::Parse, parse_macro_input, punctuated::Punctuated,
  token, Expr, Ident, LitInt, LitStr, Token,
};

/// `fn name;` for a primary table, `fn name for SYS_parent as "parent";` for a
/// secondary table keyed on the parent's code argument.
struct TableHeader {
  fn_name: Ident,
  parent: Option<(Ident, LitStr)>,
}

impl Parse for TableHeader {
  fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
    input.parse::<Token![fn]>()?;
    let fn_name = input.parse()?;
    let parent = if input.peek(Token![for]) {
      input.parse::<Token![for]>()?;
      let number: Ident = input.parse()?;
      input.parse::<Token![as]>()?;
      let name: LitStr = input.parse()?;
      Some((number, name))
    } else {
      None
    };
    input.parse::<Token![;]>()?;
    Ok(TableHeader { fn_name, parent })
  }
}

enum Numbering {
  Archs(Punctuated<Arch, Token![,]>),
  Code(LitInt),
}

struct TableEntry {
  name: Ident,
  params: Punctuated<Ident, Token![,]>,
  flags: Option<Punctuated<Ident, Token![,]>>,
  args: Punctuated<Expr, Token![,]>,
  result: Ident,
  numbering: Numbering,
}

impl Parse for TableEntry {
  fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
    let params;
    let args;
    let name = input.parse()?;
    parenthesized!(params in input);
    let params = params.parse_terminated(Ident::parse, Token![,])?;
    let flags = if input.peek(token::Bracket) {
      let flags;
      bracketed!(flags in input);
      Some(flags.parse_terminated(Ident::parse, Token![,])?)
    } else {
      None
    };
    braced!(args in input);
    let args = args.parse_terminated(Expr::parse, Token![,])?;
    input.parse::<Token![->]>()?;
    let result = input.parse()?;
    input.parse::<Token![for]>()?;
    let numbering = if input.peek(token::Bracket) {
      let archs;
      bracketed!(archs in input);
      Numbering::Archs(archs.parse_terminated(Arch::parse, Token![,])?)
    } else {
      let keyword: Ident = input.parse()?;
      if keyword != "code" {
        return Err(syn::Error::new(keyword.span(), "expected `code` or an arch list"));
      }
      Numbering::Code(input.parse()?)
    };
    Ok(TableEntry {
      name,
      params,
      flags,
      args,
      result,
      numbering,
    })
  }
}

struct Arch {
  name: syn::Ident,
  number: syn::LitInt,
}

impl Parse for Arch {
  fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
    let name = input.parse()?;
    input.parse::<Token![:]>()?;
    Ok(Arch {
      name,
      number: input.parse()?,
    })
  }
}

struct SyscallTable {
  header: TableHeader,
  entries: Punctuated<TableEntry, Token![,]>,
}

impl Parse for SyscallTable {
  fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
    Ok(SyscallTable {
      header: input.parse()?,
      entries: Punctuated::parse_terminated(input)?,
    })
  }
}

struct GenEntryResult {
  constant: proc_macro2::TokenStream,
  descriptor: proc_macro2::TokenStream,
}

fn gen_entry(
  entry: &TableEntry,
  parent: Option<&(Ident, LitStr)>,
  crate_token: &proc_macro2::TokenStream,
) -> syn::Result<GenEntryResult> {
  let name = &entry.name;
  let result = &entry.result;
  let arg_count = entry.params.len();
  let bindings = entry.params.iter().enumerate().map(|(i, param)| {
    quote! {
      #[allow(unused_variables)]
      let #param = #crate_token::Param(#i);
    }
  });
  let args = entry.args.iter();
  let flags: Vec<Ident> = match &entry.flags {
    Some(flags) => flags.iter().cloned().collect(),
    None => vec![format_ident!("AllParamsKnown")],
  };
  let (cfg, constant, number, display_name) = match (&entry.numbering, parent) {
    (Numbering::Archs(archs), None) => {
      let Some(first) = archs.first() else {
        return Err(syn::Error::new(name.span(), "at least one arch is required"));
      };
      let arch_name_0 = first.name.to_string();
      let arch_number_0 = &first.number;
      let (mut arch_names, numbers): (Vec<_>, Vec<_>) = archs
        .iter()
        .skip(1)
        .map(|x| (x.name.to_string(), x.number.clone()))
        .unzip();
      let syscall_number = quote! {
        if cfg!(target_arch = #arch_name_0) {
          #arch_number_0
        }
        #(
        else if cfg!(target_arch = #arch_names) {
          #numbers
        }
        )*
        else {
          unreachable!()
        }
      };
      arch_names.insert(0, arch_name_0);
      let const_name = format_ident!("SYS_{}", name);
      let cfg = quote!(#[cfg(any(#(target_arch = #arch_names),*))]);
      let constant = quote! {
        #cfg
        pub const #const_name: u32 = #syscall_number;
      };
      let number = quote!(#crate_token::SyscallNumber::new(#const_name, 0));
      (cfg, constant, number, name.to_string())
    }
    (Numbering::Code(code), Some((parent_number, parent_name))) => {
      let parent_name = parent_name.value();
      let const_name = format_ident!(
        "{}",
        [parent_name.as_str(), &name.to_string()]
          .iter()
          .join("_")
          .to_case(Case::UpperSnake)
      );
      let constant = quote! {
        pub const #const_name: u32 = #code;
      };
      let number = quote!(#crate_token::SyscallNumber::new(#parent_number, #const_name));
      let display_name = [parent_name.as_str(), &name.to_string()].iter().join(".");
      (quote!(), constant, number, display_name)
    }
    (Numbering::Archs(_), Some(_)) => {
      return Err(syn::Error::new(
        name.span(),
        "secondary table entries are numbered with `for code N`",
      ))
    }
    (Numbering::Code(_), None) => {
      return Err(syn::Error::new(
        name.span(),
        "`for code N` needs a table header of the form `fn name for SYS_parent as \"parent\";`",
      ))
    }
  };
  let descriptor = quote! {
    #cfg
    {
      #(#bindings)*
      let mut entry_args = Vec::new();
      #(
        #crate_token::IntoArgs::push_into(#args, &mut entry_args);
      )*
      syscall_table.push(#crate_token::SyscallDescriptor::new(
        #number,
        #display_name,
        #arg_count,
        entry_args,
        #crate_token::ReturnType::#result,
        #crate_token::syscall_flags(&[#(#crate_token::SyscallFlags::#flags),*]),
      ));
    }
  };
  Ok(GenEntryResult {
    constant,
    descriptor,
  })
}

/// Declares a syscall table.
///
/// Each entry reads `name (params) [flags]? { args } -> ReturnType for [arch: N, ...]`.
/// Inside `{ args }` every parameter name is bound to its `Param` ordinal. Entries
/// without a flag list are `AllParamsKnown`.
#[proc_macro]
pub fn gen_syscall_table(input: TokenStream) -> TokenStream {
  let table = parse_macro_input!(input as SyscallTable);
  let crate_token = get_crate("syscall-memargs");
  let mut constants = vec![];
  let mut descriptors = vec![];
  for entry in &table.entries {
    match gen_entry(entry, table.header.parent.as_ref(), &crate_token) {
      Ok(GenEntryResult {
        constant,
        descriptor,
      }) => {
        constants.push(constant);
        descriptors.push(descriptor);
      }
      Err(e) => return e.to_compile_error().into(),
    }
  }
  let fn_name = &table.header.fn_name;
  TokenStream::from(quote! {
    #(#constants)*

    pub(crate) fn #fn_name() -> Vec<#crate_token::SyscallDescriptor> {
      let mut syscall_table = Vec::new();
      #(#descriptors)*
      syscall_table
    }
  })
}

fn get_crate(name: &str) -> proc_macro2::TokenStream {
  let found_crate =
    crate_name(name).unwrap_or_else(|_| panic!("`{}` not found in `Cargo.toml`", name));

  match found_crate {
    FoundCrate::Itself => quote!(crate),
    FoundCrate::Name(name) => {
      let ident = format_ident!("{}", &name);
      quote!( #ident )
    }
  }
}
