use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

use crate::domain::error::PaymentError;
use crate::domain::gateways::GatewayResponse;
use crate::infrastructure::gateways::epx::wire::mask_card;

/// Código con el que el gateway marca una aprobación.
pub const APPROVED_RESPONSE_CODE: &str = "00";

/// Códigos que el gateway documenta como "vuelva a intentar" (emisor caído
/// o fallo del sistema): son los únicos declines que ameritan reintento.
const TRY_AGAIN_CODES: &[&str] = &["91", "96"];

/// Parsea el documento `<FIELDS><FIELD KEY=...>valor</FIELD>…</FIELDS>` a
/// un mapa plano clave → valor.
pub fn parse_fields(xml: &str) -> Result<HashMap<String, String>, PaymentError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = HashMap::new();
    let mut current_key: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"FIELD" => {
                let key = e
                    .try_get_attribute("KEY")
                    .map_err(|e| {
                        PaymentError::GatewayUnavailable(format!(
                            "malformed FIELD attribute: {}",
                            e
                        ))
                    })?
                    .ok_or_else(|| {
                        PaymentError::GatewayUnavailable(
                            "FIELD element without KEY attribute".to_string(),
                        )
                    })?;
                let key = key.unescape_value().map_err(|e| {
                    PaymentError::GatewayUnavailable(format!("malformed KEY value: {}", e))
                })?;
                current_key = Some(key.into_owned());
            }
            Ok(Event::Text(ref t)) => {
                if let Some(ref key) = current_key {
                    let value = t.unescape().map_err(|e| {
                        PaymentError::GatewayUnavailable(format!("malformed field text: {}", e))
                    })?;
                    fields.insert(key.clone(), value.into_owned());
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"FIELD" => {
                // Un FIELD vacío (<FIELD KEY="X"></FIELD>) se registra como ""
                if let Some(key) = current_key.take() {
                    fields.entry(key).or_default();
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(PaymentError::GatewayUnavailable(format!(
                    "unparseable gateway response: {}",
                    e
                )));
            }
        }
    }

    Ok(fields)
}

/// Clasificación del resultado de una respuesta ya parseada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDisposition {
    Approved,
    Declined,
    /// Decline transitorio ("try again"): elegible para reintento.
    TryAgain,
}

/// Interpreta el mapa de campos como una respuesta estructurada.
///
/// Aprobado si y solo si `AUTH_RESP == "00"`. Una respuesta sin el conjunto
/// mínimo de campos (`AUTH_RESP`) se trata como error de transporte: el
/// resultado es desconocido.
pub fn interpret(
    fields: &HashMap<String, String>,
    raw_body: String,
) -> Result<(GatewayResponse, ResponseDisposition), PaymentError> {
    let response_code = fields
        .get("AUTH_RESP")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            PaymentError::GatewayUnavailable(
                "gateway response is missing AUTH_RESP".to_string(),
            )
        })?
        .clone();

    let approved = response_code == APPROVED_RESPONSE_CODE;
    let disposition = if approved {
        ResponseDisposition::Approved
    } else if TRY_AGAIN_CODES.contains(&response_code.as_str()) {
        ResponseDisposition::TryAgain
    } else {
        ResponseDisposition::Declined
    };

    let get = |key: &str| fields.get(key).filter(|v| !v.is_empty()).cloned();

    let last_four = get("AUTH_MASKED_ACCOUNT_NBR")
        .map(|masked| masked.chars().rev().take(4).collect::<Vec<_>>())
        .map(|reversed| reversed.into_iter().rev().collect::<String>())
        .filter(|lf: &String| lf.len() == 4 && lf.chars().all(|c| c.is_ascii_digit()));

    let response = GatewayResponse {
        approved,
        response_code,
        response_text: get("AUTH_RESP_TEXT"),
        auth_code: get("AUTH_CODE"),
        avs_result: get("AUTH_AVS"),
        cvv_result: get("AUTH_CVV2"),
        card_brand: get("AUTH_CARD_TYPE"),
        masked_card: last_four.as_deref().map(mask_card),
        last_four,
        gateway_token: get("AUTH_GUID"),
        tran_nbr_echo: get("TRAN_NBR"),
        raw_body,
    };

    Ok((response, disposition))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approved_xml() -> &'static str {
        r#"<RESPONSE>
            <FIELDS>
                <FIELD KEY="AUTH_RESP">00</FIELD>
                <FIELD KEY="AUTH_RESP_TEXT">APPROVAL</FIELD>
                <FIELD KEY="AUTH_CODE">012345</FIELD>
                <FIELD KEY="AUTH_GUID">0DEF1A2B3C4D5E6F7081</FIELD>
                <FIELD KEY="AUTH_AVS">Y</FIELD>
                <FIELD KEY="AUTH_CVV2">M</FIELD>
                <FIELD KEY="AUTH_CARD_TYPE">V</FIELD>
                <FIELD KEY="AUTH_MASKED_ACCOUNT_NBR">************4242</FIELD>
                <FIELD KEY="TRAN_NBR">1130275151</FIELD>
                <FIELD KEY="STATUS">A</FIELD>
            </FIELDS>
        </RESPONSE>"#
    }

    #[test]
    fn test_parse_flat_fields_document() {
        let fields = parse_fields(approved_xml()).unwrap();

        assert_eq!(fields.get("AUTH_RESP").unwrap(), "00");
        assert_eq!(fields.get("AUTH_GUID").unwrap(), "0DEF1A2B3C4D5E6F7081");
        assert_eq!(fields.get("TRAN_NBR").unwrap(), "1130275151");
    }

    #[test]
    fn test_interpret_approved_response() {
        let fields = parse_fields(approved_xml()).unwrap();
        let (response, disposition) = interpret(&fields, approved_xml().to_string()).unwrap();

        assert_eq!(disposition, ResponseDisposition::Approved);
        assert!(response.approved);
        assert_eq!(response.response_code, "00");
        assert_eq!(response.auth_code.as_deref(), Some("012345"));
        assert_eq!(response.gateway_token.as_deref(), Some("0DEF1A2B3C4D5E6F7081"));
        assert_eq!(response.last_four.as_deref(), Some("4242"));
        assert_eq!(response.masked_card.as_deref(), Some("XXXXXXXXXXXX4242"));
        assert_eq!(response.tran_nbr_echo.as_deref(), Some("1130275151"));
    }

    #[test]
    fn test_interpret_decline() {
        let xml = r#"<RESPONSE><FIELDS>
            <FIELD KEY="AUTH_RESP">51</FIELD>
            <FIELD KEY="AUTH_RESP_TEXT">DECLINE</FIELD>
            <FIELD KEY="TRAN_NBR">0000000001</FIELD>
            <FIELD KEY="STATUS">D</FIELD>
        </FIELDS></RESPONSE>"#;

        let fields = parse_fields(xml).unwrap();
        let (response, disposition) = interpret(&fields, xml.to_string()).unwrap();

        assert_eq!(disposition, ResponseDisposition::Declined);
        assert!(!response.approved);
        assert_eq!(response.response_code, "51");
    }

    #[test]
    fn test_interpret_try_again_code() {
        let xml = r#"<RESPONSE><FIELDS>
            <FIELD KEY="AUTH_RESP">91</FIELD>
            <FIELD KEY="AUTH_RESP_TEXT">ISSUER UNAVAILABLE</FIELD>
        </FIELDS></RESPONSE>"#;

        let fields = parse_fields(xml).unwrap();
        let (_, disposition) = interpret(&fields, xml.to_string()).unwrap();

        assert_eq!(disposition, ResponseDisposition::TryAgain);
    }

    #[test]
    fn test_missing_required_field_is_transport_error() {
        let xml = r#"<RESPONSE><FIELDS>
            <FIELD KEY="AUTH_RESP_TEXT">GARBAGE</FIELD>
        </FIELDS></RESPONSE>"#;

        let fields = parse_fields(xml).unwrap();
        let result = interpret(&fields, xml.to_string());

        assert!(matches!(result, Err(PaymentError::GatewayUnavailable(_))));
    }

    #[test]
    fn test_unparseable_xml_is_transport_error() {
        let result = parse_fields("<RESPONSE><FIELDS><FIELD");
        assert!(matches!(result, Err(PaymentError::GatewayUnavailable(_))));
    }

    #[test]
    fn test_empty_field_value_is_preserved_as_empty() {
        let xml = r#"<RESPONSE><FIELDS>
            <FIELD KEY="AUTH_RESP">00</FIELD>
            <FIELD KEY="AUTH_CODE"></FIELD>
        </FIELDS></RESPONSE>"#;

        let fields = parse_fields(xml).unwrap();
        assert_eq!(fields.get("AUTH_CODE").unwrap(), "");

        let (response, _) = interpret(&fields, xml.to_string()).unwrap();
        // Vacío en el wire se normaliza a None en la respuesta estructurada
        assert_eq!(response.auth_code, None);
    }
}
