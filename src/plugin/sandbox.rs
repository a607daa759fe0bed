/// Per-tenant Lua isolation context
///
/// Every tenant gets its own `mlua::Lua` state: globals, loaded chunks and any
/// state a plugin keeps never leak into another tenant's VM. Dropping the
/// sandbox tears the VM down once the last plugin handle referencing it goes.
///
/// Plugin units register capabilities explicitly through a host prelude:
///
/// ```lua
/// register("validator", function()
///     return { tenant_id = "tenant-a", name = "EmailValidator", version = "1.0.0",
///              validate = function(self, data, ctx) return { is_valid = true } end }
/// end)
/// ```
///
/// Tenant code never runs on an async worker. Every entry goes through
/// [`VmHandle::enter`], which moves the work to the blocking pool and arms a
/// wall-clock deadline that an instruction-count hook enforces.

use crate::plugin::contracts::CapabilityKind;
use anyhow::Result;
use mlua::{Function, HookTriggers, Lua, Table, Value as LuaValue, VmState};
use serde_json::{Map, Number, Value};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

/// Globals removed from every tenant VM
const STRIPPED_GLOBALS: [&str; 8] = [
    "os", "io", "debug", "package", "require", "dofile", "loadfile", "load",
];

/// Nesting limit when converting Lua tables to JSON (guards self-referencing tables)
const MAX_DEPTH: usize = 64;

/// VM instructions between two deadline checks
const BUDGET_CHECK_INTERVAL: u32 = 10_000;

const PRELUDE: &str = r#"
__registrations = {}

function register(kind, factory)
    if type(kind) ~= "string" then
        error("register: kind must be a string", 2)
    end
    if type(factory) ~= "function" then
        error("register: factory must be a function", 2)
    end
    table.insert(__registrations, { kind = kind, factory = factory })
end

-- protected calls must not swallow a budget overrun
do
    local raw_pcall, raw_xpcall, raw_resume = pcall, xpcall, coroutine.resume
    local exceeded, raise = __budget_exceeded, error
    __budget_exceeded = nil

    local function checked(result)
        if not result[1] and exceeded() then
            raise(result[2], 0)
        end
        return table.unpack(result, 1, result.n)
    end

    pcall = function(...) return checked(table.pack(raw_pcall(...))) end
    xpcall = function(...) return checked(table.pack(raw_xpcall(...))) end
    coroutine.resume = function(...) return checked(table.pack(raw_resume(...))) end
end
"#;

/// One capability implementation registered by a plugin unit
pub struct Registration {
    pub kind: String,
    pub factory: Function,
}

impl Registration {
    pub fn capability(&self) -> Result<CapabilityKind> {
        self.kind.parse()
    }
}

/// Wall-clock budget for one entry into a tenant VM
///
/// Entries are serialized through `gate`, so the armed deadline always belongs
/// to the code currently running in the VM.
#[derive(Clone)]
struct ExecutionBudget {
    /// `Duration::ZERO` means unlimited
    limit: Duration,
    gate: Arc<Mutex<()>>,
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl ExecutionBudget {
    fn new(limit: Duration) -> Self {
        Self {
            limit,
            gate: Arc::new(Mutex::new(())),
            deadline: Arc::new(Mutex::new(None)),
        }
    }

    fn run<T>(&self, work: impl FnOnce() -> T) -> T {
        let _entry = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = (!self.limit.is_zero()).then(|| Instant::now() + self.limit);
        self.arm(deadline);
        let result = work();
        self.arm(None);
        result
    }

    fn arm(&self, deadline: Option<Instant>) {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = deadline;
    }

    fn exceeded(&self) -> bool {
        matches!(
            *self.deadline.lock().unwrap_or_else(PoisonError::into_inner),
            Some(deadline) if Instant::now() >= deadline
        )
    }
}

/// Cloneable handle on a tenant VM and its execution budget
#[derive(Clone)]
pub struct VmHandle {
    lua: Lua,
    budget: ExecutionBudget,
}

impl VmHandle {
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Run `work` against the VM on the blocking pool under the budget
    ///
    /// Code still running when the deadline passes fails with a Lua runtime
    /// error, which surfaces here like any other plugin fault.
    pub async fn enter<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Lua) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let vm = self.clone();
        tokio::task::spawn_blocking(move || vm.budget.run(|| work(&vm.lua)))
            .await
            .map_err(|e| anyhow::anyhow!("Plugin VM task failed: {}", e))?
    }
}

pub struct TenantSandbox {
    tenant_id: String,
    vm: VmHandle,
}

impl TenantSandbox {
    /// Create a hardened VM for `tenant_id`
    ///
    /// `memory_limit_mb == 0` and a zero `execution_timeout` disable the
    /// respective limit.
    pub fn new(tenant_id: &str, memory_limit_mb: usize, execution_timeout: Duration) -> Result<Self> {
        let lua = Lua::new();

        if memory_limit_mb > 0 {
            lua.set_memory_limit(memory_limit_mb * 1024 * 1024)
                .map_err(|e| anyhow::anyhow!("Failed to set Lua memory limit: {}", e))?;
        }

        let budget = ExecutionBudget::new(execution_timeout);
        let watchdog = budget.clone();
        lua.set_global_hook(
            HookTriggers::new().every_nth_instruction(BUDGET_CHECK_INTERVAL),
            move |_, _| {
                if watchdog.exceeded() {
                    return Err(mlua::Error::runtime(format!(
                        "execution budget of {}ms exceeded",
                        watchdog.limit.as_millis()
                    )));
                }
                Ok(VmState::Continue)
            },
        )
        .map_err(|e| anyhow::anyhow!("Failed to install execution budget hook: {}", e))?;

        let globals = lua.globals();
        for name in STRIPPED_GLOBALS {
            globals
                .set(name, LuaValue::Nil)
                .map_err(|e| anyhow::anyhow!("Failed to remove Lua global '{}': {}", name, e))?;
        }

        let log_tenant = tenant_id.to_string();
        let log = lua
            .create_function(move |_, message: String| {
                tracing::info!("🪵 [{}] {}", log_tenant, message);
                Ok(())
            })
            .map_err(|e| anyhow::anyhow!("Failed to create log function: {}", e))?;
        globals
            .set("log", log)
            .map_err(|e| anyhow::anyhow!("Failed to install log function: {}", e))?;

        let overrun = budget.clone();
        let exceeded = lua
            .create_function(move |_, ()| Ok(overrun.exceeded()))
            .map_err(|e| anyhow::anyhow!("Failed to create budget check: {}", e))?;
        globals
            .set("__budget_exceeded", exceeded)
            .map_err(|e| anyhow::anyhow!("Failed to install budget check: {}", e))?;

        lua.load(PRELUDE)
            .set_name("prelude")
            .exec()
            .map_err(|e| anyhow::anyhow!("Failed to install plugin prelude: {}", e))?;

        tracing::info!("🧱 Created isolation context for tenant {}", tenant_id);

        Ok(Self {
            tenant_id: tenant_id.to_string(),
            vm: VmHandle { lua, budget },
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn lua(&self) -> &Lua {
        &self.vm.lua
    }

    pub fn vm(&self) -> &VmHandle {
        &self.vm
    }

    /// Run a plugin unit and return what it registered
    pub async fn load_unit(&self, unit_name: &str, source: String) -> Result<Vec<Registration>> {
        let unit_name = unit_name.to_string();
        self.vm.enter(move |lua| run_unit(lua, &unit_name, &source)).await
    }

    /// Call a registered factory, which must return the plugin table
    pub async fn instantiate(&self, registration: &Registration) -> Result<Table> {
        let factory = registration.factory.clone();
        let produced: LuaValue = self
            .vm
            .enter(move |_| {
                factory
                    .call(())
                    .map_err(|e| anyhow::anyhow!("Plugin factory failed: {}", e))
            })
            .await?;

        match produced {
            LuaValue::Table(instance) => Ok(instance),
            other => Err(anyhow::anyhow!(
                "Plugin factory returned {} instead of a table",
                other.type_name()
            )),
        }
    }
}

fn run_unit(lua: &Lua, unit_name: &str, source: &str) -> Result<Vec<Registration>> {
    let globals = lua.globals();
    let fresh = lua
        .create_table()
        .map_err(|e| anyhow::anyhow!("Failed to reset registrations: {}", e))?;
    globals
        .set("__registrations", fresh)
        .map_err(|e| anyhow::anyhow!("Failed to reset registrations: {}", e))?;

    lua.load(source)
        .set_name(unit_name)
        .exec()
        .map_err(|e| anyhow::anyhow!("Failed to execute plugin unit '{}': {}", unit_name, e))?;

    let registered: Table = globals
        .get("__registrations")
        .map_err(|e| anyhow::anyhow!("Plugin unit '{}' clobbered its registrations: {}", unit_name, e))?;

    let mut registrations = Vec::new();
    for entry in registered.sequence_values::<Table>() {
        let entry = entry.map_err(|e| anyhow::anyhow!("Invalid registration in '{}': {}", unit_name, e))?;
        let kind: String = entry
            .get("kind")
            .map_err(|e| anyhow::anyhow!("Invalid registration kind in '{}': {}", unit_name, e))?;
        let factory: Function = entry
            .get("factory")
            .map_err(|e| anyhow::anyhow!("Invalid registration factory in '{}': {}", unit_name, e))?;
        registrations.push(Registration { kind, factory });
    }

    Ok(registrations)
}

/// Convert a JSON value into a Lua value owned by `lua`
pub fn json_to_lua(lua: &Lua, value: &Value) -> Result<LuaValue> {
    let converted = match value {
        Value::Null => LuaValue::Nil,
        Value::Bool(b) => LuaValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => LuaValue::Integer(i),
            None => LuaValue::Number(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => LuaValue::String(
            lua.create_string(s)
                .map_err(|e| anyhow::anyhow!("Failed to create Lua string: {}", e))?,
        ),
        Value::Array(items) => {
            let table = lua
                .create_table()
                .map_err(|e| anyhow::anyhow!("Failed to create Lua table: {}", e))?;
            for (i, item) in items.iter().enumerate() {
                table
                    .raw_set(i + 1, json_to_lua(lua, item)?)
                    .map_err(|e| anyhow::anyhow!("Failed to fill Lua table: {}", e))?;
            }
            LuaValue::Table(table)
        }
        Value::Object(map) => {
            let table = lua
                .create_table()
                .map_err(|e| anyhow::anyhow!("Failed to create Lua table: {}", e))?;
            for (key, item) in map {
                table
                    .raw_set(key.as_str(), json_to_lua(lua, item)?)
                    .map_err(|e| anyhow::anyhow!("Failed to fill Lua table: {}", e))?;
            }
            LuaValue::Table(table)
        }
    };

    Ok(converted)
}

/// Convert a Lua value to JSON
///
/// Tables with keys `1..n` become arrays, everything else (including the empty
/// table) becomes an object. Functions and userdata become null.
pub fn lua_to_json(value: LuaValue) -> Result<Value> {
    lua_to_json_at(value, 0)
}

fn lua_to_json_at(value: LuaValue, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(anyhow::anyhow!("Lua value nested deeper than {} levels", MAX_DEPTH));
    }

    match value {
        LuaValue::Nil => Ok(Value::Null),
        LuaValue::Boolean(b) => Ok(Value::Bool(b)),
        LuaValue::Integer(i) => Ok(Value::Number(Number::from(i))),
        LuaValue::Number(f) => Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)),
        LuaValue::String(s) => {
            let s = s
                .to_str()
                .map_err(|e| anyhow::anyhow!("Invalid UTF-8 in Lua string: {}", e))?;
            Ok(Value::String(s.to_string()))
        }
        LuaValue::Table(table) => {
            let mut is_array = true;
            let mut max_index = 0usize;
            let mut count = 0usize;

            for pair in table.pairs::<LuaValue, LuaValue>() {
                let (key, _) = pair.map_err(|e| anyhow::anyhow!("Failed to iterate Lua table: {}", e))?;
                count += 1;
                match key {
                    LuaValue::Integer(i) if i > 0 => max_index = max_index.max(i as usize),
                    _ => {
                        is_array = false;
                        break;
                    }
                }
            }

            if is_array && count > 0 && count == max_index {
                let mut items = Vec::with_capacity(max_index);
                for i in 1..=max_index {
                    let item: LuaValue = table
                        .raw_get(i)
                        .map_err(|e| anyhow::anyhow!("Failed to read Lua table: {}", e))?;
                    items.push(lua_to_json_at(item, depth + 1)?);
                }
                Ok(Value::Array(items))
            } else {
                let mut object = Map::new();
                for pair in table.pairs::<LuaValue, LuaValue>() {
                    let (key, item) = pair.map_err(|e| anyhow::anyhow!("Failed to iterate Lua table: {}", e))?;
                    let key = match key {
                        LuaValue::String(s) => s
                            .to_str()
                            .map_err(|e| anyhow::anyhow!("Invalid UTF-8 in Lua key: {}", e))?
                            .to_string(),
                        LuaValue::Integer(i) => i.to_string(),
                        LuaValue::Number(f) => f.to_string(),
                        _ => continue,
                    };
                    object.insert(key, lua_to_json_at(item, depth + 1)?);
                }
                Ok(Value::Object(object))
            }
        }
        _ => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sandbox() -> TenantSandbox {
        TenantSandbox::new("tenant-a", 0, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn dangerous_globals_are_removed() {
        let sandbox = TenantSandbox::new("tenant-a", 16, Duration::ZERO).unwrap();
        for name in STRIPPED_GLOBALS {
            let global: LuaValue = sandbox.lua().globals().get(name).unwrap();
            assert!(global.is_nil(), "{} should be stripped", name);
        }
        assert!(sandbox.lua().load("os.exit(1)").exec().is_err());
    }

    #[tokio::test]
    async fn units_register_capabilities() {
        let sandbox = sandbox();
        let registrations = sandbox
            .load_unit(
                "validators.lua",
                r#"
                log("loading")
                register("validator", function() return { tenant_id = "tenant-a" } end)
                register("workflow_handler", function() return { tenant_id = "tenant-a" } end)
                "#
                .to_string(),
            )
            .await
            .unwrap();

        assert_eq!(registrations.len(), 2);
        assert_eq!(registrations[0].capability().unwrap(), CapabilityKind::Validator);
        let instance = sandbox.instantiate(&registrations[1]).await.unwrap();
        let tenant: String = instance.get("tenant_id").unwrap();
        assert_eq!(tenant, "tenant-a");

        let again = sandbox.load_unit("empty.lua", "local x = 1".to_string()).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn broken_units_and_factories_are_errors() {
        let sandbox = sandbox();
        assert!(sandbox.load_unit("broken.lua", "this is not lua".into()).await.is_err());
        assert!(sandbox
            .load_unit("bad.lua", r#"register("validator", 42)"#.into())
            .await
            .is_err());

        let registrations = sandbox
            .load_unit("odd.lua", r#"register("validator", function() return 7 end)"#.into())
            .await
            .unwrap();
        assert!(sandbox.instantiate(&registrations[0]).await.is_err());
    }

    #[tokio::test]
    async fn runaway_code_is_stopped_at_the_deadline() {
        let sandbox = TenantSandbox::new("tenant-a", 0, Duration::from_millis(100)).unwrap();

        let started = Instant::now();
        let err = sandbox
            .load_unit("spin.lua", "while true do end".into())
            .await
            .err()
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(err.to_string().contains("execution budget"), "{}", err);

        let caught = sandbox
            .load_unit(
                "stubborn.lua",
                "while true do pcall(function() while true do end end) end".into(),
            )
            .await;
        assert!(caught.is_err());

        let registrations = sandbox
            .load_unit(
                "after.lua",
                r#"register("validator", function() return { tenant_id = "tenant-a" } end)"#.into(),
            )
            .await
            .unwrap();
        assert_eq!(registrations.len(), 1);
    }

    #[tokio::test]
    async fn factories_share_the_budget() {
        let sandbox = TenantSandbox::new("tenant-a", 0, Duration::from_millis(100)).unwrap();
        let registrations = sandbox
            .load_unit(
                "slow.lua",
                r#"register("validator", function() while true do end end)"#.into(),
            )
            .await
            .unwrap();
        assert!(sandbox.instantiate(&registrations[0]).await.is_err());
    }

    #[test]
    fn tenants_do_not_share_globals() {
        let a = sandbox();
        let b = TenantSandbox::new("tenant-b", 0, Duration::ZERO).unwrap();
        a.lua().load("shared_secret = 'a-only'").exec().unwrap();

        let leaked: LuaValue = b.lua().globals().get("shared_secret").unwrap();
        assert!(leaked.is_nil());
    }

    #[test]
    fn json_survives_a_trip_through_lua() {
        let sandbox = sandbox();
        let value = json!({
            "email": "a@example.com",
            "age": 30,
            "ratio": 0.5,
            "tags": ["x", "y"],
            "nested": { "ok": true }
        });

        let lua_value = json_to_lua(sandbox.lua(), &value).unwrap();
        assert_eq!(lua_to_json(lua_value).unwrap(), value);
    }

    #[test]
    fn empty_table_becomes_object_and_cycles_are_rejected() {
        let sandbox = sandbox();
        let empty: LuaValue = sandbox.lua().load("return {}").eval().unwrap();
        assert_eq!(lua_to_json(empty).unwrap(), json!({}));

        let cyclic: LuaValue = sandbox
            .lua()
            .load("local t = {} t.me = t return t")
            .eval()
            .unwrap();
        assert!(lua_to_json(cyclic).is_err());
    }
}
