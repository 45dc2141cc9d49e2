use super::host;
use crate::error::{Error, Result};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[cfg(feature = "opencl")]
use ocl::{Context, Device};

/// The kernel programs shipped with the crate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Program {
    Matrix,
    Activation,
    Convolution,
    Pooling,
    Optimization,
}

impl Program {
    pub fn source(self) -> &'static str {
        match self {
            Program::Matrix => include_str!("../cl/matrix.cl"),
            Program::Activation => include_str!("../cl/activation.cl"),
            Program::Convolution => include_str!("../cl/convolution.cl"),
            Program::Pooling => include_str!("../cl/pooling.cl"),
            Program::Optimization => include_str!("../cl/optimization.cl"),
        }
    }
    pub fn file_name(self) -> &'static str {
        match self {
            Program::Matrix => "matrix.cl",
            Program::Activation => "activation.cl",
            Program::Convolution => "convolution.cl",
            Program::Pooling => "pooling.cl",
            Program::Optimization => "optimization.cl",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum CompiledProgram {
    /// Kernel names declared by the source
    Host(Arc<Vec<String>>),
    #[cfg(feature = "opencl")]
    Cl(ocl::Program),
}

/// A compiled kernel, identified by the hash of its program source and its name.
#[derive(Clone, Debug)]
pub struct KernelHandle {
    program_hash: u64,
    name: Arc<str>,
    program: CompiledProgram,
}

impl KernelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn program_hash(&self) -> u64 {
        self.program_hash
    }
    pub(crate) fn program(&self) -> &CompiledProgram {
        &self.program
    }
}

impl PartialEq for KernelHandle {
    fn eq(&self, other: &KernelHandle) -> bool {
        self.program_hash == other.program_hash && self.name == other.name
    }
}

pub(crate) enum Compiler {
    Host,
    #[cfg(feature = "opencl")]
    Cl { context: Context, device: Device },
}

/// Compiles programs on first use and caches both programs (by source hash) and kernels (by
/// source hash and name).
pub(crate) struct KernelCache {
    compiler: Compiler,
    programs: Mutex<HashMap<u64, CompiledProgram>>,
    kernels: Mutex<HashMap<(u64, String), KernelHandle>>,
    compilations: AtomicUsize,
}

fn source_hash(source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

fn lock_error<T>(_: T) -> Error {
    Error::Device("kernel cache lock poisoned".to_owned())
}

/// Returns the names of every `__kernel` function declared in an OpenCL C source.
pub(crate) fn declared_kernels(source: &str) -> Vec<String> {
    source
        .split("__kernel")
        .skip(1)
        .filter_map(|decl| {
            let signature = decl.split('(').next()?;
            signature.split_whitespace().last().map(str::to_owned)
        })
        .collect()
}

impl KernelCache {
    pub fn new(compiler: Compiler) -> KernelCache {
        KernelCache {
            compiler,
            programs: Mutex::new(HashMap::new()),
            kernels: Mutex::new(HashMap::new()),
            compilations: AtomicUsize::new(0),
        }
    }

    /// Number of program compilations performed so far.
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::SeqCst)
    }

    pub fn compile_kernel(&self, source: &str, name: &str) -> Result<KernelHandle> {
        let hash = source_hash(source);
        let key = (hash, name.to_owned());
        if let Some(handle) = self.kernels.lock().map_err(lock_error)?.get(&key) {
            return Ok(handle.clone());
        }

        let program = {
            let mut programs = self.programs.lock().map_err(lock_error)?;
            match programs.get(&hash) {
                Some(program) => program.clone(),
                None => {
                    let program = self.compile_program(source)?;
                    self.compilations.fetch_add(1, Ordering::SeqCst);
                    debug!("compiled program {:016x}", hash);
                    programs.insert(hash, program.clone());
                    program
                }
            }
        };

        if let CompiledProgram::Host(names) = &program {
            if !names.iter().any(|n| n == name) {
                return Err(Error::Device(format!(
                    "kernel `{}` is not declared in program {:016x}",
                    name, hash
                )));
            }
            if !host::has_kernel(name) {
                return Err(Error::Device(format!(
                    "kernel `{}` has no host implementation",
                    name
                )));
            }
        }

        let handle = KernelHandle {
            program_hash: hash,
            name: Arc::from(name),
            program,
        };
        self.kernels
            .lock()
            .map_err(lock_error)?
            .insert(key, handle.clone());
        Ok(handle)
    }

    fn compile_program(&self, source: &str) -> Result<CompiledProgram> {
        match &self.compiler {
            Compiler::Host => Ok(CompiledProgram::Host(Arc::new(declared_kernels(source)))),
            #[cfg(feature = "opencl")]
            Compiler::Cl { context, device } => {
                let program = ocl::Program::builder()
                    .devices(*device)
                    .cmplr_opt("-cl-std=CL1.2")
                    .src(source)
                    .build(context)?;
                Ok(CompiledProgram::Cl(program))
            }
        }
    }
}
