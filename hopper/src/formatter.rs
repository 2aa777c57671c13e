use colored::*;
use hopper_core::{
    client::{ClientError, DynamicCallError},
    grpc::{MethodType, thunk::CallKind},
    prost_reflect::{self, MethodDescriptor, ServiceDescriptor},
    tonic::Status,
};

/// A wrapper struct for a formatted, colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

pub struct ServiceList(pub Vec<ServiceDescriptor>);

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", self.0)?;
        Ok(())
    }
}

impl From<serde_json::Value> for FormattedString {
    fn from(value: serde_json::Value) -> Self {
        FormattedString(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
    }
}

impl From<Status> for FormattedString {
    fn from(status: Status) -> Self {
        FormattedString(format!(
            "{} code={:?} message={:?}",
            "gRPC Failed:".red().bold(),
            status.code(),
            status.message()
        ))
    }
}

impl From<DynamicCallError> for FormattedString {
    fn from(err: DynamicCallError) -> Self {
        match err {
            DynamicCallError::Client(err) => FormattedString::from(err),
            err => FormattedString(format!("{}\n\n'{}'", "Call Failed:".red().bold(), err)),
        }
    }
}

impl From<ClientError> for FormattedString {
    fn from(err: ClientError) -> Self {
        let mut out = format!(
            "{} status={} service={}\n\n'{}'",
            "Call Failed:".red().bold(),
            err.status_code.to_string().yellow(),
            err.service_name,
            err.cause
        );
        let failures = err.failures();
        if failures.len() > 1 {
            out.push_str("\n\nAttempts:");
            for (attempt, failure) in failures.iter().enumerate() {
                out.push_str(&format!("\n  {}. {}", attempt + 1, failure));
            }
        }
        FormattedString(out)
    }
}

impl From<prost_reflect::DescriptorError> for FormattedString {
    fn from(err: prost_reflect::DescriptorError) -> Self {
        FormattedString(format!(
            "{}\n\n'{}'",
            "Failed to parse file descriptor:".red().bold(),
            err
        ))
    }
}

impl From<anyhow::Error> for FormattedString {
    fn from(err: anyhow::Error) -> Self {
        FormattedString(format!("{}\n\n'{:#}'", "Error:".red().bold(), err))
    }
}

impl From<ServiceList> for FormattedString {
    fn from(ServiceList(services): ServiceList) -> Self {
        if services.is_empty() {
            return FormattedString("The descriptor set defines no services.".yellow().to_string());
        }

        let lines: Vec<String> = services
            .iter()
            .map(|service| {
                let count = service.methods().count();
                let noun = if count == 1 { "method" } else { "methods" };
                format!("{}  ({count} {noun})", service.full_name().green())
            })
            .collect();
        FormattedString(lines.join("\n"))
    }
}

impl From<ServiceDescriptor> for FormattedString {
    fn from(service: ServiceDescriptor) -> Self {
        let mut lines = vec![service.full_name().green().bold().to_string()];
        lines.extend(
            service
                .methods()
                .map(|method| format!("  {}", FormattedString::from(method).0)),
        );
        FormattedString(lines.join("\n"))
    }
}

/// One line per method: name, message types, shape and the call kind used when none is requested.
impl From<MethodDescriptor> for FormattedString {
    fn from(method: MethodDescriptor) -> Self {
        let method_type = MethodType::of(&method);
        FormattedString(format!(
            "{} {} -> {}  [{}, {}]",
            method.name().cyan(),
            method.input().full_name(),
            method.output().full_name(),
            method_type,
            CallKind::for_method(method_type).as_str().yellow()
        ))
    }
}
