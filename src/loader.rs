// Raybridge Symbol Resolution
// Opens the native library through the platform loader and looks up exported functions

use crate::abi::Address;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use libloading::{Library, Symbol};
use rustc_hash::FxHashMap;
use std::ffi::c_void;
use std::path::Path;
use tracing::debug;

/// Anything that maps exported symbol names to code addresses
pub trait SymbolSource: Send + Sync {
    fn name(&self) -> &str;
    fn resolve(&self, symbol: &str) -> BridgeResult<Address>;
}

/// The loaded native library; lives as long as the bridge that owns it
pub type NativeHandle = Box<dyn SymbolSource>;

/// A shared library opened with `dlopen`/`LoadLibrary`
pub struct NativeLibrary {
    library: Library,
    name: String,
    path: String,
}

impl NativeLibrary {
    /// Open by library name (e.g. "raylib"), trying the platform file names in order
    pub fn open(name: &str, soname_versions: &[String]) -> BridgeResult<Self> {
        Self::open_candidates(name, &candidate_names(name, soname_versions))
    }

    /// Open an explicit file path; no other candidates are tried
    pub fn open_path(path: &Path) -> BridgeResult<Self> {
        let display = path.display().to_string();
        Self::open_candidates(&display, &[display.clone()])
    }

    pub fn open_configured(config: &BridgeConfig) -> BridgeResult<Self> {
        match &config.library_path {
            Some(path) => Self::open_path(path),
            None => Self::open(&config.library, &config.soname_versions),
        }
    }

    fn open_candidates(name: &str, candidates: &[String]) -> BridgeResult<Self> {
        let mut last_error = None;
        for candidate in candidates {
            debug!(library = name, candidate = candidate.as_str(), "trying native library");
            // SAFETY: loading runs the library's initializers; raylib has none with preconditions
            match unsafe { Library::new(candidate) } {
                Ok(library) => {
                    debug!(library = name, path = candidate.as_str(), "native library loaded");
                    return Ok(NativeLibrary {
                        library,
                        name: name.to_string(),
                        path: candidate.clone(),
                    });
                }
                Err(e) => last_error = Some(e.to_string()),
            }
        }
        Err(BridgeError::LibraryNotFound {
            name: name.to_string(),
            tried: candidates.join(", "),
            reason: last_error.unwrap_or_else(|| "no candidate file names".to_string()),
        })
    }

    /// The file name the platform loader accepted
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl SymbolSource for NativeLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, symbol: &str) -> BridgeResult<Address> {
        let not_found = || BridgeError::SymbolNotFound {
            library: self.name.clone(),
            symbol: symbol.to_string(),
        };
        // SAFETY: the address is only ever called through a descriptor built for it
        let found: Symbol<'_, *const c_void> =
            unsafe { self.library.get(symbol.as_bytes()) }.map_err(|_| not_found())?;
        let address = Address::from_ptr(*found);
        if address.is_null() {
            return Err(not_found());
        }
        debug!(library = self.name.as_str(), symbol, %address, "resolved symbol");
        Ok(address)
    }
}

/// Platform file names to try for a library name, most specific first
pub fn candidate_names(name: &str, soname_versions: &[String]) -> Vec<String> {
    let mut names = vec![libloading::library_filename(name)
        .to_string_lossy()
        .into_owned()];
    if cfg!(target_os = "linux") {
        for version in soname_versions {
            names.push(format!("lib{}.so.{}", name, version));
        }
    }
    names.push(name.to_string());
    names.dedup();
    names
}

/// An in-process symbol table: `extern "C"` functions registered by address.
/// Used to embed a native library that is linked into the binary.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    name: String,
    symbols: FxHashMap<String, Address>,
}

impl SymbolTable {
    pub fn new(name: &str) -> Self {
        SymbolTable {
            name: name.to_string(),
            symbols: FxHashMap::default(),
        }
    }

    pub fn with(mut self, symbol: &str, address: Address) -> Self {
        self.insert(symbol, address);
        self
    }

    pub fn insert(&mut self, symbol: &str, address: Address) {
        self.symbols.insert(symbol.to_string(), address);
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl SymbolSource for SymbolTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, symbol: &str) -> BridgeResult<Address> {
        match self.symbols.get(symbol) {
            Some(address) if !address.is_null() => Ok(*address),
            _ => Err(BridgeError::SymbolNotFound {
                library: self.name.clone(),
                symbol: symbol.to_string(),
            }),
        }
    }
}
