use crate::language::{
    ast::{Entity, Module},
    errors::{AnalyzerError, AnalyzerResult, ErrorKind},
    types::{EntityRef, TypeExpr},
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Module-relative position: a file inside a package.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub package: String,
    pub file: String,
}

impl Location {
    pub fn new(package: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            file: file.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.file)
    }
}

/// Read-only view over the whole module from one file.
#[derive(Clone, Debug)]
pub struct Scope<'a> {
    module: &'a Module,
    prelude: &'a str,
    top_type: &'a str,
    pub location: Location,
}

impl<'a> Scope<'a> {
    pub fn new(module: &'a Module, prelude: &'a str, top_type: &'a str, location: Location) -> Self {
        Self {
            module,
            prelude,
            top_type,
            location,
        }
    }

    pub fn module(&self) -> &'a Module {
        self.module
    }

    pub fn prelude(&self) -> &'a str {
        self.prelude
    }

    /// Same module, seen from another file.
    pub fn relocate(&self, location: Location) -> Scope<'a> {
        Scope {
            module: self.module,
            prelude: self.prelude,
            top_type: self.top_type,
            location,
        }
    }

    /// Canonical reference to the top type.
    pub fn top_ref(&self) -> EntityRef {
        EntityRef::canonical(self.prelude, self.top_type)
    }

    pub fn is_top_type(&self, expr: &TypeExpr) -> bool {
        let Some(inst) = expr.as_inst() else {
            return false;
        };
        inst.args.is_empty()
            && inst.reference.name == self.top_type
            && inst
                .reference
                .package
                .as_deref()
                .map_or(true, |package| package == self.prelude)
    }

    /// Finds the entity a reference points to together with its location.
    ///
    /// Unqualified names are searched in the current file, then the current
    /// package, then the prelude. A qualifier is an import alias of the current
    /// file or, failing that, a package name. Canonical references skip the
    /// import table; exports were checked when they were produced.
    pub fn entity(&self, reference: &EntityRef) -> AnalyzerResult<(&'a Entity, Location)> {
        let Some(qualifier) = reference.package.as_deref() else {
            return self.unqualified(reference);
        };
        if reference.canonical {
            return self.in_package(qualifier, reference);
        }

        let imports = self
            .module
            .packages
            .get(&self.location.package)
            .and_then(|package| package.files.get(&self.location.file))
            .map(|file| &file.imports);

        if let Some(path) = imports.and_then(|imports| imports.get(qualifier)) {
            let (entity, location) = self.in_package(path, reference)?;
            if location.package != self.location.package && !entity.exported {
                return Err(self.error(ErrorKind::EntityNotExported {
                    reference: reference.clone(),
                }));
            }
            return Ok((entity, location));
        }

        if self.module.packages.contains_key(qualifier) {
            return self.in_package(qualifier, reference);
        }

        Err(self.error(ErrorKind::ImportNotFound {
            alias: qualifier.to_string(),
        }))
    }

    fn unqualified(&self, reference: &EntityRef) -> AnalyzerResult<(&'a Entity, Location)> {
        if let Some(package) = self.module.packages.get(&self.location.package) {
            if let Some(entity) = package
                .files
                .get(&self.location.file)
                .and_then(|file| file.entities.get(&reference.name))
            {
                return Ok((entity, self.location.clone()));
            }
            if let Some((entity, file)) = package.entity(&reference.name) {
                return Ok((entity, Location::new(&self.location.package, file)));
            }
        }

        if let Some(prelude) = self.module.packages.get(self.prelude) {
            if let Some((entity, file)) = prelude.entity(&reference.name) {
                if entity.exported || self.location.package == self.prelude {
                    return Ok((entity, Location::new(self.prelude, file)));
                }
            }
        }

        Err(self.error(ErrorKind::EntityNotFound {
            reference: reference.clone(),
        }))
    }

    fn in_package(
        &self,
        package_name: &str,
        reference: &EntityRef,
    ) -> AnalyzerResult<(&'a Entity, Location)> {
        let package = self.module.packages.get(package_name).ok_or_else(|| {
            self.error(ErrorKind::PackageNotFound {
                package: package_name.to_string(),
            })
        })?;
        package
            .entity(&reference.name)
            .map(|(entity, file)| (entity, Location::new(package_name, file)))
            .ok_or_else(|| {
                self.error(ErrorKind::EntityNotFound {
                    reference: reference.clone(),
                })
            })
    }

    fn error(&self, kind: ErrorKind) -> AnalyzerError {
        AnalyzerError::at(kind, &self.location, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::ast::{Decl, File, Package, TypeDef};

    fn base_type(exported: bool) -> Entity {
        Entity {
            exported,
            decl: Decl::Type(TypeDef::default()),
            span: None,
        }
    }

    fn module() -> Module {
        let mut module = Module::default();
        let mut prelude = File::default();
        prelude.entities.insert("int".into(), base_type(true));
        module
            .packages
            .entry("builtin".into())
            .or_insert_with(Package::default)
            .files
            .insert("builtin.flow".into(), prelude);

        let mut lib = File::default();
        lib.entities.insert("public".into(), base_type(true));
        lib.entities.insert("private".into(), base_type(false));
        module
            .packages
            .entry("lib".into())
            .or_insert_with(Package::default)
            .files
            .insert("lib.flow".into(), lib);

        let mut main = File::default();
        main.imports.insert("l".into(), "lib".into());
        main.entities.insert("local".into(), base_type(false));
        let mut other = File::default();
        other.entities.insert("sibling".into(), base_type(false));
        let package = module.packages.entry("main".into()).or_insert_with(Package::default);
        package.files.insert("main.flow".into(), main);
        package.files.insert("other.flow".into(), other);
        module
    }

    #[test]
    fn unqualified_lookup_order() {
        let module = module();
        let scope = Scope::new(&module, "builtin", "any", Location::new("main", "main.flow"));
        let (_, location) = scope.entity(&EntityRef::local("local")).expect("local");
        assert_eq!(location, Location::new("main", "main.flow"));
        let (_, location) = scope.entity(&EntityRef::local("sibling")).expect("sibling");
        assert_eq!(location, Location::new("main", "other.flow"));
        let (_, location) = scope.entity(&EntityRef::local("int")).expect("prelude");
        assert_eq!(location, Location::new("builtin", "builtin.flow"));
    }

    #[test]
    fn imported_entities_must_be_exported() {
        let module = module();
        let scope = Scope::new(&module, "builtin", "any", Location::new("main", "main.flow"));
        assert!(scope.entity(&EntityRef::qualified("l", "public")).is_ok());
        let err = scope
            .entity(&EntityRef::qualified("l", "private"))
            .expect_err("private entity");
        assert!(matches!(err.kind, ErrorKind::EntityNotExported { .. }));
    }

    #[test]
    fn unknown_qualifier_is_reported() {
        let module = module();
        let scope = Scope::new(&module, "builtin", "any", Location::new("main", "main.flow"));
        let err = scope
            .entity(&EntityRef::qualified("nope", "x"))
            .expect_err("unknown alias");
        assert_eq!(err.kind, ErrorKind::ImportNotFound { alias: "nope".into() });
    }

    #[test]
    fn top_type_accepts_plain_and_canonical_refs() {
        let module = module();
        let scope = Scope::new(&module, "builtin", "any", Location::new("main", "main.flow"));
        assert!(scope.is_top_type(&TypeExpr::named("any")));
        assert!(scope.is_top_type(&TypeExpr::inst(scope.top_ref(), Vec::new())));
        assert!(!scope.is_top_type(&TypeExpr::named("int")));
    }

    #[test]
    fn canonical_refs_ignore_shadowing_aliases() {
        let mut module = module();
        let mut shadow = File::default();
        shadow.entities.insert("unrelated".into(), base_type(true));
        module
            .packages
            .entry("other".into())
            .or_insert_with(Package::default)
            .files
            .insert("other.flow".into(), shadow);
        module
            .packages
            .get_mut("main")
            .and_then(|package| package.files.get_mut("main.flow"))
            .expect("main file")
            .imports
            .insert("lib".into(), "other".into());
        let scope = Scope::new(&module, "builtin", "any", Location::new("main", "main.flow"));

        let (_, location) = scope
            .entity(&EntityRef::canonical("lib", "public"))
            .expect("defining package wins");
        assert_eq!(location, Location::new("lib", "lib.flow"));

        let err = scope
            .entity(&EntityRef::qualified("lib", "public"))
            .expect_err("alias points at `other`");
        assert!(matches!(err.kind, ErrorKind::EntityNotFound { .. }));
    }
}
