use super::Analyzer;
use crate::language::{
    ast::{Decl, Module},
    errors::{AnalyzerError, AnalyzerResult, ErrorKind, Subject},
    scope::Location,
};
use tracing::debug;

impl Analyzer {
    /// The entry package holds one unexported, non-generic entry component and
    /// exports nothing. The component itself is checked with the rest of its
    /// package.
    pub(super) fn validate_entry(&self, module: &Module) -> AnalyzerResult<()> {
        let package_name = &self.options.entry_package;
        let entry_name = &self.options.entry_component;
        let package = module.packages.get(package_name).ok_or_else(|| {
            AnalyzerError::new(ErrorKind::EntryPackageNotFound {
                package: package_name.clone(),
            })
        })?;

        let Some((entity, file)) = package.entity(entry_name) else {
            let location = Location::new(package_name, "");
            return Err(AnalyzerError::at(
                ErrorKind::EntryNotFound {
                    name: entry_name.clone(),
                },
                &location,
                None,
            ));
        };
        let location = Location::new(package_name, file);
        let fail = |kind| {
            Err(AnalyzerError::at(kind, &location, entity.span).within(
                &location,
                None,
                Some(Subject::Entity(entry_name.clone())),
            ))
        };

        let Decl::Component(component) = &entity.decl else {
            return fail(ErrorKind::EntryNotComponent {
                name: entry_name.clone(),
                kind: entity.kind(),
            });
        };
        if entity.exported {
            return fail(ErrorKind::EntryExported {
                name: entry_name.clone(),
            });
        }
        if !component.interface.params.is_empty() {
            return fail(ErrorKind::EntryGeneric {
                name: entry_name.clone(),
            });
        }

        if let Some((file, name, exported)) = package
            .entities()
            .find(|(_, _, entity)| entity.exported)
        {
            let location = Location::new(package_name, file);
            return Err(AnalyzerError::at(
                ErrorKind::EntryPackageExports {
                    entity: name.to_string(),
                    file: file.to_string(),
                },
                &location,
                exported.span,
            ));
        }

        debug!(package = %package_name, entry = %entry_name, "entry component is valid");
        Ok(())
    }
}
