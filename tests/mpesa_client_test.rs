use bigdecimal::BigDecimal;
use mockito::Matcher;
use qpesapay_backend::chains::{RailError, RailKind, RailTransfer, SettlementRail};
use qpesapay_backend::domain::{Currency, PhoneNumber};
use qpesapay_backend::payments::{MpesaClient, MpesaConfig, MpesaRail, PaymentError};
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

fn config(base_url: String) -> MpesaConfig {
    MpesaConfig {
        consumer_key: "consumer-key".to_string(),
        consumer_secret: "consumer-secret".to_string(),
        shortcode: "174379".to_string(),
        passkey: "passkey".to_string(),
        callback_url: "https://gateway.test/webhooks/mpesa/callback".to_string(),
        timeout_url: None,
        result_url: None,
        base_url,
        timeout_secs: 5,
        max_retries: 0,
    }
}

fn token_body() -> String {
    json!({ "access_token": "test-token", "expires_in": "3599" }).to_string()
}

#[tokio::test]
async fn test_access_token_is_cached() {
    let mut server = mockito::Server::new_async().await;
    let oauth = server
        .mock("GET", Matcher::Regex(r"^/oauth/v1/generate".to_string()))
        .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
        .with_status(200)
        .with_body(token_body())
        .expect(1)
        .create_async()
        .await;

    let client = MpesaClient::new(config(server.url())).unwrap();
    assert_eq!(client.access_token().await.unwrap(), "test-token");
    assert_eq!(client.access_token().await.unwrap(), "test-token");

    oauth.assert_async().await;
}

#[tokio::test]
async fn test_rejected_credentials_are_an_authentication_error() {
    let mut server = mockito::Server::new_async().await;
    let _oauth = server
        .mock("GET", Matcher::Regex(r"^/oauth/v1/generate".to_string()))
        .with_status(400)
        .with_body(json!({ "errorMessage": "Invalid credentials" }).to_string())
        .create_async()
        .await;

    let client = MpesaClient::new(config(server.url())).unwrap();
    let err = client.access_token().await.unwrap_err();
    assert!(
        matches!(err, PaymentError::AuthenticationError { .. }),
        "unexpected error: {:?}",
        err
    );
}

#[tokio::test]
async fn test_stk_push_sends_daraja_request() {
    let mut server = mockito::Server::new_async().await;
    let _oauth = server
        .mock("GET", Matcher::Regex(r"^/oauth/v1/generate".to_string()))
        .with_status(200)
        .with_body(token_body())
        .create_async()
        .await;
    let stk = server
        .mock("POST", "/mpesa/stkpush/v1/processrequest")
        .match_header("authorization", "Bearer test-token")
        .match_body(Matcher::PartialJson(json!({
            "BusinessShortCode": "174379",
            "TransactionType": "CustomerPayBillOnline",
            "Amount": "1500",
            "PartyA": "254712345678",
            "PartyB": "174379",
            "PhoneNumber": "254712345678",
            "AccountReference": "INV42"
        })))
        .with_status(200)
        .with_body(
            json!({
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_42",
                "ResponseCode": "0",
                "ResponseDescription": "Success. Request accepted for processing",
                "CustomerMessage": "Success. Request accepted for processing"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = MpesaClient::new(config(server.url())).unwrap();
    let phone = PhoneNumber::parse("0712345678").unwrap();
    let response = client
        .initiate_stk_push(
            &phone,
            &BigDecimal::from_str("1500.40").unwrap(),
            "INV42",
            "Invoice 42",
        )
        .await
        .unwrap();

    assert_eq!(response.checkout_request_id, "ws_CO_42");
    stk.assert_async().await;
}

#[tokio::test]
async fn test_declined_stk_push_is_a_rejection() {
    let mut server = mockito::Server::new_async().await;
    let _oauth = server
        .mock("GET", Matcher::Regex(r"^/oauth/v1/generate".to_string()))
        .with_status(200)
        .with_body(token_body())
        .create_async()
        .await;
    let _stk = server
        .mock("POST", "/mpesa/stkpush/v1/processrequest")
        .with_status(200)
        .with_body(
            json!({
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_43",
                "ResponseCode": "1",
                "ResponseDescription": "Unable to lock subscriber"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let rail = MpesaRail::new(MpesaClient::new(config(server.url())).unwrap());
    assert_eq!(rail.kind(), RailKind::Mpesa);

    let transfer = RailTransfer {
        transaction_id: Uuid::new_v4(),
        to: "+254712345678".to_string(),
        amount: BigDecimal::from(250),
        currency: Currency::Kes,
        description: None,
        account_reference: None,
    };
    let err = rail.send_transaction(&transfer).await.unwrap_err();
    assert!(
        matches!(err, RailError::Rejected { .. }),
        "unexpected error: {:?}",
        err
    );
}

#[tokio::test]
async fn test_rail_rejects_invalid_phone_before_calling_daraja() {
    let mut server = mockito::Server::new_async().await;
    let oauth = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let rail = MpesaRail::new(MpesaClient::new(config(server.url())).unwrap());
    let transfer = RailTransfer {
        transaction_id: Uuid::new_v4(),
        to: "12345".to_string(),
        amount: BigDecimal::from(250),
        currency: Currency::Kes,
        description: None,
        account_reference: None,
    };

    let err = rail.send_transaction(&transfer).await.unwrap_err();
    assert!(matches!(err, RailError::InvalidDestination { .. }));
    oauth.assert_async().await;
}
