//! `x509.decode` for PEM encoded certificates and certificate signing
//! requests.

use base64::Engine as _;
use chrono::{DateTime, SecondsFormat};
use serde_json::{json, Map, Value as Json};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::objects::{oid2sn, oid_registry};
use x509_parser::prelude::{FromDer, X509Name};
use x509_parser::time::ASN1Time;
use x509_parser::x509::AlgorithmIdentifier;

use crate::decls::{Declarations, Overload};
use crate::error::EvalError;
use crate::stdlib::arg_str;
use crate::types::{ObjectType, Type};
use crate::value::Value;

pub(crate) const NAMESPACE_TYPE: &str = "x509.X509";

fn algorithm_name(alg: &AlgorithmIdentifier<'_>) -> String {
    oid2sn(&alg.algorithm, oid_registry()).map_or_else(|_| alg.algorithm.to_id_string(), str::to_string)
}

fn name_map(name: &X509Name<'_>) -> Json {
    let strings = |values: Vec<&str>| Json::from(values.into_iter().map(str::to_string).collect::<Vec<_>>());
    json!({
        "string": name.to_string(),
        "commonName": name.iter_common_name().next().and_then(|cn| cn.as_str().ok()).unwrap_or_default(),
        "organization": strings(name.iter_organization().filter_map(|v| v.as_str().ok()).collect()),
        "organizationalUnit": strings(name.iter_organizational_unit().filter_map(|v| v.as_str().ok()).collect()),
        "country": strings(name.iter_country().filter_map(|v| v.as_str().ok()).collect()),
    })
}

fn time_string(time: ASN1Time) -> Json {
    DateTime::from_timestamp(time.timestamp(), 0)
        .map_or(Json::Null, |t| Json::from(t.to_rfc3339_opts(SecondsFormat::Secs, true)))
}

/// Collects alternative names into `dnsNames`, `emailAddresses`,
/// `ipAddresses` and `uris`.
fn alternative_names<'a, 'b: 'a>(names: impl Iterator<Item = &'a GeneralName<'b>>, out: &mut Map<String, Json>) {
    let mut dns = Vec::new();
    let mut emails = Vec::new();
    let mut ips = Vec::new();
    let mut uris = Vec::new();
    for name in names {
        match name {
            GeneralName::DNSName(s) => dns.push(Json::from(*s)),
            GeneralName::RFC822Name(s) => emails.push(Json::from(*s)),
            GeneralName::URI(s) => uris.push(Json::from(*s)),
            GeneralName::IPAddress(bytes) => ips.push(Json::from(ip_string(bytes))),
            _ => {}
        }
    }
    out.insert("dnsNames".to_string(), Json::Array(dns));
    out.insert("emailAddresses".to_string(), Json::Array(emails));
    out.insert("ipAddresses".to_string(), Json::Array(ips));
    out.insert("uris".to_string(), Json::Array(uris));
}

fn ip_string(bytes: &[u8]) -> String {
    match bytes.len() {
        4 => std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).to_string(),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            std::net::Ipv6Addr::from(octets).to_string()
        }
        _ => hex::encode(bytes),
    }
}

fn decode_certificate(der: &[u8]) -> Result<Json, String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).map_err(|e| e.to_string())?;
    let mut out = Map::new();
    out.insert("version".to_string(), Json::from(cert.version().0 + 1));
    out.insert("serialNumber".to_string(), Json::from(cert.serial.to_string()));
    out.insert("subject".to_string(), name_map(cert.subject()));
    out.insert("issuer".to_string(), name_map(cert.issuer()));
    out.insert("notBefore".to_string(), time_string(cert.validity().not_before));
    out.insert("notAfter".to_string(), time_string(cert.validity().not_after));
    out.insert("isCA".to_string(), Json::from(cert.is_ca()));
    out.insert(
        "signatureAlgorithm".to_string(),
        Json::from(algorithm_name(&cert.signature_algorithm)),
    );
    out.insert(
        "publicKeyAlgorithm".to_string(),
        Json::from(algorithm_name(&cert.public_key().algorithm)),
    );
    let san = cert.subject_alternative_name().map_err(|e| e.to_string())?;
    alternative_names(san.iter().flat_map(|ext| ext.value.general_names.iter()), &mut out);
    out.insert(
        "raw".to_string(),
        Json::from(base64::engine::general_purpose::STANDARD.encode(der)),
    );
    Ok(Json::Object(out))
}

fn decode_request(der: &[u8]) -> Result<Json, String> {
    let (_, csr) = X509CertificationRequest::from_der(der).map_err(|e| e.to_string())?;
    let info = &csr.certification_request_info;
    let mut out = Map::new();
    out.insert("version".to_string(), Json::from(info.version.0));
    out.insert("subject".to_string(), name_map(&info.subject));
    out.insert(
        "signatureAlgorithm".to_string(),
        Json::from(algorithm_name(&csr.signature_algorithm)),
    );
    out.insert(
        "publicKeyAlgorithm".to_string(),
        Json::from(algorithm_name(&info.subject_pki.algorithm)),
    );
    let names = csr
        .requested_extensions()
        .into_iter()
        .flatten()
        .filter_map(|ext| match ext {
            ParsedExtension::SubjectAlternativeName(san) => Some(san.general_names.iter()),
            _ => None,
        })
        .flatten();
    alternative_names(names, &mut out);
    out.insert(
        "raw".to_string(),
        Json::from(base64::engine::general_purpose::STANDARD.encode(der)),
    );
    Ok(Json::Object(out))
}

/// Decodes the first PEM block of `pem`.
fn decode(pem: &str) -> Result<Json, String> {
    let (_, block) = x509_parser::pem::parse_x509_pem(pem.as_bytes()).map_err(|e| e.to_string())?;
    match block.label.as_str() {
        "CERTIFICATE" => decode_certificate(&block.contents),
        "CERTIFICATE REQUEST" | "NEW CERTIFICATE REQUEST" => decode_request(&block.contents),
        other => Err(format!("unsupported PEM block type '{other}'")),
    }
}

pub(crate) fn declarations() -> Declarations {
    Declarations::default()
        .with_type(ObjectType::opaque(NAMESPACE_TYPE))
        .with_function(
            "decode",
            vec![Overload::method(
                "x509_decode_string",
                vec![Type::object(NAMESPACE_TYPE), Type::String],
                Type::map(Type::String, Type::Dyn),
                |_, args| {
                    let decoded = decode(arg_str(args, 1)?).map_err(|e| EvalError::function("x509.decode", e))?;
                    Ok(Value::from_json(&decoded))
                },
            )],
        )
}
