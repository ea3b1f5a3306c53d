//! HubSpot CRM tools.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use callsight_core::config::CrmConfig;
use callsight_core::domain::tool::{ToolClass, ToolError};

use super::{typed_input, Tool, ToolRegistry};

const CONTACT_PROPERTIES: [&str; 5] = ["email", "firstname", "lastname", "company", "phone"];

pub struct HubSpotClient {
    http: Client,
    base_url: String,
    token: SecretString,
    timeout_ms: u64,
}

impl HubSpotClient {
    pub fn new(
        base_url: &str,
        token: SecretString,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    /// `None` when the CRM is disabled or has no token.
    pub fn from_config(config: &CrmConfig, timeout: Duration) -> Result<Option<Self>, reqwest::Error> {
        match (config.enabled, &config.access_token) {
            (true, Some(token)) => Self::new(&config.api_base_url, token.clone(), timeout).map(Some),
            _ => Ok(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, ToolError> {
        let response = request
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    ToolError::Timeout(self.timeout_ms)
                } else {
                    ToolError::Upstream(format!("hubspot unreachable: {error}"))
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|error| ToolError::Upstream(format!("hubspot returned invalid JSON: {error}")))
    }

    async fn search_contacts(
        &self,
        property: &str,
        operator: &str,
        value: &str,
        limit: u32,
    ) -> Result<Vec<Value>, ToolError> {
        let body = json!({
            "filterGroups": [{
                "filters": [{"propertyName": property, "operator": operator, "value": value}]
            }],
            "properties": CONTACT_PROPERTIES,
            "limit": limit,
        });
        let response = self
            .send(self.http.post(self.url("/crm/v3/objects/contacts/search")).json(&body))
            .await?;
        Ok(response.get("results").and_then(Value::as_array).cloned().unwrap_or_default())
    }

    pub async fn find_contact_by_email(&self, email: &str) -> Result<Value, ToolError> {
        self.search_contacts("email", "EQ", email, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::NotFound(format!("no contact found for email: {email}")))
    }
}

pub(crate) fn classify_status(status: StatusCode, body: String) -> ToolError {
    let detail = format!("HTTP {}: {}", status.as_u16(), body.trim());
    match status {
        StatusCode::NOT_FOUND => ToolError::NotFound(detail),
        StatusCode::TOO_MANY_REQUESTS => ToolError::RateLimited(detail),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            ToolError::Validation(detail)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ToolError::Timeout(0),
        _ => ToolError::Upstream(detail),
    }
}

fn require_text(tool: &str, field: &str, value: &str) -> Result<(), ToolError> {
    if value.trim().is_empty() {
        return Err(ToolError::Validation(format!("{tool}: `{field}` must not be empty")));
    }
    Ok(())
}

pub fn register_crm_tools(registry: &mut ToolRegistry, client: Arc<HubSpotClient>) {
    registry.register(GetContactByEmail(client.clone()));
    registry.register(SearchContactsByCompany(client.clone()));
    registry.register(GetContactDeals(client.clone()));
    registry.register(UpdateContact(client.clone()));
    registry.register(CreateSupportTicket(client));
}

pub struct GetContactByEmail(Arc<HubSpotClient>);

#[derive(Deserialize)]
struct EmailInput {
    email: String,
}

#[async_trait]
impl Tool for GetContactByEmail {
    fn name(&self) -> &'static str {
        "get_contact_by_email"
    }

    fn class(&self) -> ToolClass {
        ToolClass::Lookup
    }

    fn description(&self) -> &'static str {
        "Look up the CRM contact for an email the customer gives or implies."
    }

    fn input_hint(&self) -> Value {
        json!({"email": "sarah@bigco.com"})
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolError> {
        let input: EmailInput = typed_input(self.name(), input)?;
        require_text(self.name(), "email", &input.email)?;
        self.0.find_contact_by_email(input.email.trim()).await
    }
}

pub struct SearchContactsByCompany(Arc<HubSpotClient>);

#[derive(Deserialize)]
struct CompanyInput {
    #[serde(alias = "company_name", alias = "company_id")]
    company: String,
}

#[async_trait]
impl Tool for SearchContactsByCompany {
    fn name(&self) -> &'static str {
        "search_contacts_by_company"
    }

    fn class(&self) -> ToolClass {
        ToolClass::Lookup
    }

    fn description(&self) -> &'static str {
        "Find contacts at a company when the customer names the company but not an email."
    }

    fn input_hint(&self) -> Value {
        json!({"company": "Globex"})
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolError> {
        let input: CompanyInput = typed_input(self.name(), input)?;
        require_text(self.name(), "company", &input.company)?;
        let contacts = self.0.search_contacts("company", "CONTAINS_TOKEN", input.company.trim(), 10).await?;
        Ok(json!({"contacts": contacts}))
    }
}

pub struct GetContactDeals(Arc<HubSpotClient>);

#[derive(Deserialize)]
struct ContactIdInput {
    contact_id: String,
}

#[async_trait]
impl Tool for GetContactDeals {
    fn name(&self) -> &'static str {
        "get_contact_deals"
    }

    fn class(&self) -> ToolClass {
        ToolClass::Lookup
    }

    fn description(&self) -> &'static str {
        "Summarise the deals of a contact when pricing, trials or renewals come up."
    }

    fn input_hint(&self) -> Value {
        json!({"contact_id": "51"})
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolError> {
        let input: ContactIdInput = typed_input(self.name(), input)?;
        require_text(self.name(), "contact_id", &input.contact_id)?;
        let client = &self.0;

        let associations = client
            .send(client.http.get(client.url(&format!(
                "/crm/v3/objects/contacts/{}/associations/deals",
                input.contact_id.trim()
            ))))
            .await?;
        let deal_ids: Vec<String> = associations
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .filter_map(|deal| match deal.get("id") {
                        Some(Value::String(id)) => Some(id.clone()),
                        Some(Value::Number(id)) => Some(id.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut deals = Vec::with_capacity(deal_ids.len());
        for deal_id in deal_ids {
            let request = client
                .http
                .get(client.url(&format!("/crm/v3/objects/deals/{deal_id}")))
                .query(&[("properties", "dealname,amount,dealstage,closedate")]);
            match client.send(request).await {
                Ok(deal) => {
                    let properties = deal.get("properties").cloned().unwrap_or(Value::Null);
                    deals.push(json!({
                        "id": deal_id,
                        "name": properties.get("dealname"),
                        "amount": properties.get("amount"),
                        "stage": properties.get("dealstage"),
                        "close_date": properties.get("closedate"),
                    }));
                }
                Err(error) => {
                    deals.push(json!({"id": deal_id, "error": error.to_string()}));
                }
            }
        }

        Ok(json!({"deals": deals}))
    }
}

pub struct UpdateContact(Arc<HubSpotClient>);

#[derive(Deserialize)]
struct UpdateContactInput {
    email: String,
    #[serde(alias = "fields")]
    properties: BTreeMap<String, String>,
}

#[async_trait]
impl Tool for UpdateContact {
    fn name(&self) -> &'static str {
        "update_contact"
    }

    fn class(&self) -> ToolClass {
        ToolClass::Mutation
    }

    fn description(&self) -> &'static str {
        "Update contact properties when the customer gives new personal details."
    }

    fn input_hint(&self) -> Value {
        json!({"email": "sarah@bigco.com", "properties": {"phone": "555-1234"}})
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolError> {
        let input: UpdateContactInput = typed_input(self.name(), input)?;
        require_text(self.name(), "email", &input.email)?;
        if input.properties.is_empty() {
            return Err(ToolError::Validation("update_contact: `properties` is empty".to_string()));
        }

        let client = &self.0;
        let contact = client.find_contact_by_email(input.email.trim()).await?;
        let contact_id = contact
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::Upstream("hubspot contact has no id".to_string()))?
            .to_string();

        client
            .send(
                client
                    .http
                    .patch(client.url(&format!("/crm/v3/objects/contacts/{contact_id}")))
                    .json(&json!({"properties": input.properties})),
            )
            .await?;

        Ok(json!({"contact_id": contact_id, "updated": input.properties.keys().collect::<Vec<_>>()}))
    }
}

pub struct CreateSupportTicket(Arc<HubSpotClient>);

#[derive(Deserialize)]
struct TicketInput {
    subject: String,
    #[serde(alias = "body")]
    description: String,
    #[serde(default = "default_priority")]
    priority: String,
    #[serde(default)]
    contact_id: Option<String>,
}

fn default_priority() -> String {
    "MEDIUM".to_string()
}

#[async_trait]
impl Tool for CreateSupportTicket {
    fn name(&self) -> &'static str {
        "create_support_ticket"
    }

    fn class(&self) -> ToolClass {
        ToolClass::Mutation
    }

    fn description(&self) -> &'static str {
        "Open a support ticket when the customer reports a product issue or service failure."
    }

    fn input_hint(&self) -> Value {
        json!({"subject": "Dashboard not loading", "description": "Customer reports the dashboard has failed all week", "priority": "HIGH"})
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolError> {
        let input: TicketInput = typed_input(self.name(), input)?;
        require_text(self.name(), "subject", &input.subject)?;
        require_text(self.name(), "description", &input.description)?;
        let priority = input.priority.trim().to_ascii_uppercase();
        if !matches!(priority.as_str(), "LOW" | "MEDIUM" | "HIGH") {
            return Err(ToolError::Validation(format!(
                "create_support_ticket: priority `{priority}` is not LOW, MEDIUM or HIGH"
            )));
        }

        let mut body = json!({
            "properties": {
                "hs_ticket_priority": priority,
                "subject": input.subject,
                "content": input.description,
                "hs_pipeline_stage": "1",
            }
        });
        if let Some(contact_id) = input.contact_id.filter(|id| !id.trim().is_empty()) {
            // 16 = HubSpot-defined ticket-to-contact association.
            body["associations"] = json!([{
                "to": {"id": contact_id},
                "types": [{"associationCategory": "HUBSPOT_DEFINED", "associationTypeId": 16}]
            }]);
        }

        let client = &self.0;
        let created = client
            .send(client.http.post(client.url("/crm/v3/objects/tickets")).json(&body))
            .await?;
        Ok(json!({"ticket_id": created.get("id").cloned().unwrap_or(Value::Null)}))
    }
}
