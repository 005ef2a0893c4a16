//! Semantic analysis of a parsed module: every declaration is resolved and
//! every component network is type- and usage-checked.

mod entities;
mod entry;
mod network;
mod nodes;

use crate::language::{
    ast::{File, Module, Package},
    errors::{AnalyzerError, AnalyzerResult, ErrorKind, Subject},
    scope::{Location, Scope},
    typesystem::{Resolver, SubtypeChecker, TypeFrame},
    types::{Param, TypeExpr},
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Knobs of the analyzer, read from the `[analyzer]` table of the manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerOptions {
    /// Package holding the program entry component.
    pub entry_package: String,
    pub entry_component: String,
    /// Package searched last for unqualified names.
    pub prelude_package: String,
    /// Packages under this prefix may declare interfaces without inports or outports.
    pub std_prefix: String,
    /// Prelude type every other type is a subtype of.
    pub top_type: String,
    /// Outport name synthesized for autoports components that declare none.
    pub autoports_outport: String,
    /// Analyze packages on the rayon thread pool.
    pub parallel: bool,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            entry_package: "main".into(),
            entry_component: "Main".into(),
            prelude_package: "builtin".into(),
            std_prefix: "std".into(),
            top_type: "any".into(),
            autoports_outport: "res".into(),
            parallel: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Analyzer {
    options: AnalyzerOptions,
    resolver: Resolver,
    checker: SubtypeChecker,
}

impl Analyzer {
    pub fn new(options: AnalyzerOptions) -> Self {
        Self {
            options,
            resolver: Resolver::new(),
            checker: SubtypeChecker::new(),
        }
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    /// Resolves every package of `module` and returns the resolved copy. The
    /// input is never modified; the first failure in package order wins.
    pub fn analyze(&self, module: &Module) -> AnalyzerResult<Module> {
        let results: Vec<(String, AnalyzerResult<Package>)> = if self.options.parallel {
            module
                .packages
                .par_iter()
                .map(|(name, package)| (name.clone(), self.analyze_package(module, name, package)))
                .collect()
        } else {
            module
                .packages
                .iter()
                .map(|(name, package)| (name.clone(), self.analyze_package(module, name, package)))
                .collect()
        };

        let packages = results
            .into_iter()
            .map(|(name, result)| result.map(|package| (name, package)))
            .collect::<AnalyzerResult<BTreeMap<_, _>>>()?;

        info!(packages = packages.len(), "module analyzed");
        Ok(Module {
            manifest: module.manifest.clone(),
            packages,
        })
    }

    /// Like [`Analyzer::analyze`], additionally requiring the module to be a
    /// runnable program with a well-formed entry package.
    pub fn analyze_executable(&self, module: &Module) -> AnalyzerResult<Module> {
        self.validate_entry(module)?;
        self.analyze(module)
    }

    fn analyze_package(
        &self,
        module: &Module,
        name: &str,
        package: &Package,
    ) -> AnalyzerResult<Package> {
        debug!(package = name, files = package.files.len(), "analyzing package");
        let wrap = |err: AnalyzerError, file: &str| {
            err.within(
                &Location::new(name, file),
                None,
                Some(Subject::Package(name.to_string())),
            )
        };

        let mut declared: BTreeMap<&str, &str> = BTreeMap::new();
        for (file, entity_name, _) in package.entities() {
            if let Some(first) = declared.insert(entity_name, file) {
                let location = Location::new(name, file);
                let err = AnalyzerError::at(
                    ErrorKind::DuplicateEntity {
                        name: entity_name.to_string(),
                        first: first.to_string(),
                        second: file.to_string(),
                    },
                    &location,
                    None,
                );
                return Err(wrap(err, file));
            }
        }

        let mut resolved = Package::default();
        for (file_name, file) in &package.files {
            let scope = self.scope(module, Location::new(name, file_name));
            let mut entities = BTreeMap::new();
            for (entity_name, entity) in &file.entities {
                let analyzed = self
                    .analyze_entity(entity_name, entity, &scope)
                    .map_err(|err| {
                        err.within(
                            &scope.location,
                            entity.span,
                            Some(Subject::Entity(entity_name.clone())),
                        )
                    })
                    .map_err(|err| wrap(err, file_name.as_str()))?;
                entities.insert(entity_name.clone(), analyzed);
            }
            resolved.files.insert(
                file_name.clone(),
                File {
                    imports: file.imports.clone(),
                    entities,
                },
            );
        }
        Ok(resolved)
    }

    fn scope<'a>(&'a self, module: &'a Module, location: Location) -> Scope<'a> {
        Scope::new(
            module,
            &self.options.prelude_package,
            &self.options.top_type,
            location,
        )
    }

    fn is_std_package(&self, package: &str) -> bool {
        let prefix = &self.options.std_prefix;
        package == self.options.prelude_package
            || package == prefix
            || package
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Parameter bound to its constraint, or to the top type when unconstrained.
    /// Used wherever a generic body has to be checked without concrete arguments.
    fn constraint_frame(&self, params: &[Param], scope: &Scope<'_>) -> AnalyzerResult<TypeFrame> {
        let mut frame = TypeFrame::new();
        for param in params {
            let bound = match &param.constraint {
                Some(constraint) => self.resolver.resolve_with_frame(constraint, &frame, scope)?,
                None => TypeExpr::inst(scope.top_ref(), Vec::new()),
            };
            frame.insert(param.name.clone(), bound);
        }
        Ok(frame)
    }
}

/// Parameter bound to itself, so resolved generic declarations keep their
/// parameters by name.
fn identity_frame(params: &[Param]) -> TypeFrame {
    params
        .iter()
        .map(|param| (param.name.clone(), TypeExpr::named(&param.name)))
        .collect()
}
