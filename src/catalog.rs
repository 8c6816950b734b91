//! Built-in template catalog
//!
//! Leaf configuration data for the engine: one record per resource kind,
//! carrying the argument schema, the create body (with generation-time
//! directive markup where the emitted source depends on argument shape),
//! and the property/export derivations over backend-assigned attributes.

use serde_json::Value;

use crate::record::{SemanticType, TemplateRecord, TemplateRegistry};

/// Registry pre-loaded with every built-in template
pub fn builtin() -> TemplateRegistry {
    let registry = TemplateRegistry::new();
    registry.register(kms_alias());
    registry.register(s3_bucket_policy());
    registry.register(secret());
    registry.register(api_stage());
    registry.register(cloudfront_distribution());
    registry
}

fn kms_alias() -> TemplateRecord {
    TemplateRecord::builder("kms_alias")
        .required("Name", SemanticType::Str)
        .required("AliasName", SemanticType::Str)
        .required("TargetKey", SemanticType::Resource)
        .create_body(
            "\
targetKeyId: {{TargetKey}}.id,
name: {{AliasName}},
",
        )
        .build()
        .expect("builtin template parses")
}

fn s3_bucket_policy() -> TemplateRecord {
    TemplateRecord::builder("s3_bucket_policy")
        .required("Name", SemanticType::Str)
        .required("Bucket", SemanticType::Resource)
        .required("Policy", SemanticType::Object)
        .create_body(
            "\
bucket: {{Bucket}}.id,
policy: {{Policy}},
",
        )
        .build()
        .expect("builtin template parses")
}

fn secret() -> TemplateRecord {
    TemplateRecord::builder("secret")
        .required("Name", SemanticType::Str)
        .required("protect", SemanticType::Bool)
        .create_body(
            "\
name: {{Name}},
recoveryWindowInDays: 0,
",
        )
        .property("Arn", |handle, _, _| handle.attribute("arn"))
        .property("Id", |handle, _, _| handle.attribute("id"))
        .build()
        .expect("builtin template parses")
}

fn api_stage() -> TemplateRecord {
    TemplateRecord::builder("api_stage")
        .required("Name", SemanticType::Str)
        .required("RestApi", SemanticType::Resource)
        .required("Deployment", SemanticType::Resource)
        .required("StageName", SemanticType::Str)
        .create_body(
            "\
deployment: {{Deployment}}.id,
restApi: {{RestApi}}.id,
stageName: {{StageName}},
",
        )
        // Bare invoke domain: strip the scheme, then the stage path
        .property("StageInvokeUrl", |handle, _, _| {
            handle.attribute("invokeUrl").map(|value| {
                let url = value
                    .as_str()
                    .ok_or_else(|| format!("invokeUrl is not a string: {}", value))?;
                let after_scheme = url
                    .split("//")
                    .nth(1)
                    .ok_or_else(|| format!("unexpected invoke url shape: {}", url))?;
                let domain = after_scheme.split('/').next().unwrap_or(after_scheme);
                Ok(Value::String(domain.to_string()))
            })
        })
        .export("Url", |handle, _, _| handle.attribute("invokeUrl"))
        .build()
        .expect("builtin template parses")
}

fn cloudfront_distribution() -> TemplateRecord {
    TemplateRecord::builder("cloudfront_distribution")
        .required("Name", SemanticType::Str)
        .required("Origins", SemanticType::List)
        .required("CloudfrontDefaultCertificate", SemanticType::Bool)
        .required("Enabled", SemanticType::Bool)
        .required("DefaultCacheBehavior", SemanticType::Object)
        .required("Restrictions", SemanticType::Object)
        .optional("DefaultRootObject", SemanticType::Str)
        .create_body(
            "\
origins: {{Origins}},
enabled: {{Enabled}},
viewerCertificate: {
    cloudfrontDefaultCertificate: {{CloudfrontDefaultCertificate}},
},
{{- if DefaultCacheBehavior.targetOriginId }}
defaultCacheBehavior: {{DefaultCacheBehavior}},
{{- else }}
defaultCacheBehavior: {
    ...{{DefaultCacheBehavior}},
    targetOriginId: {{Origins[0].originId}},
},
{{- end }}
restrictions: {{Restrictions}},
{{- if DefaultRootObject }}
defaultRootObject: {{DefaultRootObject}},
{{- end }}
",
        )
        .export("Domain", |handle, _, _| handle.attribute("domainName"))
        .build()
        .expect("builtin template parses")
}
