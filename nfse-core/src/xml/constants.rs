pub const NFE_NS: &str = "http://www.prefeitura.sp.gov.br/nfe";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const SOAP12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

pub const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const RSA_SHA1_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const SHA1_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const ENVELOPED_SIGNATURE_TRANSFORM: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

/// Prefix of the SOAP action of every remote operation.
pub const SOAP_ACTION_BASE: &str = "http://www.prefeitura.sp.gov.br/nfe/ws/";
/// Version sent alongside every message.
pub const SCHEMA_VERSION: u32 = 1;
